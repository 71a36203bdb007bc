use crate::error::ConnectError;

/// One vendor control write of the firmware load sequence. `value` and `index` go out as the
/// setup packet's fields and `length` bytes of payload are taken from the image's data blob,
/// directly after the previous command's payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FirmwareCommand {
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

#[derive(Copy, Clone, Debug)]
pub struct FirmwareImage<'a> {
    commands: &'a [FirmwareCommand],
    data: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
    pub const fn new(commands: &'a [FirmwareCommand], data: &'a [u8]) -> Self {
        Self { commands, data }
    }

    /// Pairs every command with its payload, in table order. Fails if the blob doesn't cover
    /// the table exactly, naming the first command that can't be satisfied.
    pub fn segments(&self) -> Result<Vec<(FirmwareCommand, &'a [u8])>, ConnectError> {
        let mut segments = Vec::with_capacity(self.commands.len());
        let mut offset = 0;

        for (number, command) in self.commands.iter().enumerate() {
            let end = offset + command.length as usize;
            let payload = self
                .data
                .get(offset..end)
                .ok_or(ConnectError::MalformedFirmware(number))?;
            segments.push((*command, payload));
            offset = end;
        }

        if offset != self.data.len() {
            return Err(ConnectError::MalformedFirmware(self.commands.len()));
        }
        Ok(segments)
    }
}

// CPUCS on the FX2, writing 1 holds the 8051 in reset and writing 0 lets it run.
const CPUCS: u16 = 0xe600;

// The vendor program body is not redistributable, so the built in table only carries the reset
// framing. Images generated from the vendor firmware are loaded with `Logic::open_with`.
static LOGIC_COMMANDS: [FirmwareCommand; 2] = [
    FirmwareCommand {
        value: CPUCS,
        index: 0,
        length: 1,
    },
    FirmwareCommand {
        value: CPUCS,
        index: 0,
        length: 1,
    },
];

static LOGIC_DATA: [u8; 2] = [0x01, 0x00];

pub static SALEAE_LOGIC_FIRMWARE: FirmwareImage<'static> =
    FirmwareImage::new(&LOGIC_COMMANDS, &LOGIC_DATA);
