use slogic_types::SampleRate;

const TABLE: [(&str, u8, u32); 10] = [
    ("24MHz", 1, 24_000_000),
    ("16MHz", 2, 16_000_000),
    ("12MHz", 3, 12_000_000),
    ("8MHz", 5, 8_000_000),
    ("4MHz", 11, 4_000_000),
    ("2MHz", 24, 2_000_000),
    ("1MHz", 47, 1_000_000),
    ("500kHz", 95, 500_000),
    ("250kHz", 191, 250_000),
    ("200kHz", 239, 200_000),
];

#[test]
fn every_documented_rate_resolves() {
    for (name, divider, frequency) in TABLE {
        let rate = SampleRate::lookup(name).unwrap_or_else(|| panic!("{name} missing"));
        assert_eq!(rate.name(), name);
        assert_eq!(rate.clock_divider(), divider);
        assert_eq!(rate.frequency_hz(), frequency);
    }
}

#[test]
fn unknown_names_are_not_found() {
    for name in ["", "24mhz", "24 MHz", "24MHz ", "100kHz", "48MHz", "MHz"] {
        assert_eq!(SampleRate::lookup(name), None, "{name:?} should not resolve");
    }
}

#[test]
fn iteration_follows_table_order() {
    let names: Vec<&str> = SampleRate::all().map(|rate| rate.name()).collect();
    let expected: Vec<&str> = TABLE.iter().map(|(name, _, _)| *name).collect();
    assert_eq!(names, expected);
}
