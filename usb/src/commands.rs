/// Commands understood by the Logic firmware on the command output endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Asks for a single status byte on the command input endpoint.
    ReadStatus,

    /// Switches the device into streaming mode, sampling at the given clock divider.
    StartStreaming(u8),
}

impl Command {
    pub fn command_id(&self) -> u8 {
        match self {
            Command::ReadStatus => 0x05,
            Command::StartStreaming(_) => 0x01,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::ReadStatus => vec![self.command_id()],
            Command::StartStreaming(divider) => vec![self.command_id(), *divider],
        }
    }
}
