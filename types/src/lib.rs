#[cfg(feature = "clap")]
use clap::ValueEnum;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

/// The sampling rates the Logic firmware can be switched to.
///
/// Each rate maps to the clock divider byte sent with the streaming command. Names are
/// matched exactly (case sensitive), so `"24mhz"` is not a rate.
#[derive(
    Copy, Clone, Debug, Display, AsRefStr, EnumString, EnumIter, EnumCount, PartialEq, Eq, Hash,
)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
pub enum SampleRate {
    #[strum(serialize = "24MHz")]
    #[cfg_attr(feature = "clap", value(name = "24MHz"))]
    Rate24MHz,

    #[strum(serialize = "16MHz")]
    #[cfg_attr(feature = "clap", value(name = "16MHz"))]
    Rate16MHz,

    #[strum(serialize = "12MHz")]
    #[cfg_attr(feature = "clap", value(name = "12MHz"))]
    Rate12MHz,

    #[strum(serialize = "8MHz")]
    #[cfg_attr(feature = "clap", value(name = "8MHz"))]
    Rate8MHz,

    #[strum(serialize = "4MHz")]
    #[cfg_attr(feature = "clap", value(name = "4MHz"))]
    Rate4MHz,

    #[strum(serialize = "2MHz")]
    #[cfg_attr(feature = "clap", value(name = "2MHz"))]
    Rate2MHz,

    #[strum(serialize = "1MHz")]
    #[cfg_attr(feature = "clap", value(name = "1MHz"))]
    Rate1MHz,

    #[strum(serialize = "500kHz")]
    #[cfg_attr(feature = "clap", value(name = "500kHz"))]
    Rate500kHz,

    #[strum(serialize = "250kHz")]
    #[cfg_attr(feature = "clap", value(name = "250kHz"))]
    Rate250kHz,

    #[strum(serialize = "200kHz")]
    #[cfg_attr(feature = "clap", value(name = "200kHz"))]
    Rate200kHz,
}

impl SampleRate {
    /// Finds a rate by its display name, returns `None` for anything not in the table.
    pub fn lookup(name: &str) -> Option<SampleRate> {
        <SampleRate as FromStr>::from_str(name).ok()
    }

    pub fn all() -> impl Iterator<Item = SampleRate> {
        SampleRate::iter()
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleRate::Rate24MHz => "24MHz",
            SampleRate::Rate16MHz => "16MHz",
            SampleRate::Rate12MHz => "12MHz",
            SampleRate::Rate8MHz => "8MHz",
            SampleRate::Rate4MHz => "4MHz",
            SampleRate::Rate2MHz => "2MHz",
            SampleRate::Rate1MHz => "1MHz",
            SampleRate::Rate500kHz => "500kHz",
            SampleRate::Rate250kHz => "250kHz",
            SampleRate::Rate200kHz => "200kHz",
        }
    }

    // The firmware waits (divider + 1) ticks of its 48MHz clock between samples.
    pub fn clock_divider(&self) -> u8 {
        match self {
            SampleRate::Rate24MHz => 1,
            SampleRate::Rate16MHz => 2,
            SampleRate::Rate12MHz => 3,
            SampleRate::Rate8MHz => 5,
            SampleRate::Rate4MHz => 11,
            SampleRate::Rate2MHz => 24,
            SampleRate::Rate1MHz => 47,
            SampleRate::Rate500kHz => 95,
            SampleRate::Rate250kHz => 191,
            SampleRate::Rate200kHz => 239,
        }
    }

    /// Nominal samples per second, informational only.
    pub fn frequency_hz(&self) -> u32 {
        match self {
            SampleRate::Rate24MHz => 24_000_000,
            SampleRate::Rate16MHz => 16_000_000,
            SampleRate::Rate12MHz => 12_000_000,
            SampleRate::Rate8MHz => 8_000_000,
            SampleRate::Rate4MHz => 4_000_000,
            SampleRate::Rate2MHz => 2_000_000,
            SampleRate::Rate1MHz => 1_000_000,
            SampleRate::Rate500kHz => 500_000,
            SampleRate::Rate250kHz => 250_000,
            SampleRate::Rate200kHz => 200_000,
        }
    }
}
