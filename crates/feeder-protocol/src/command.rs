pub const COMMAND_LEN: usize = 2;

pub const SNAPSHOT_COMMAND: [u8; COMMAND_LEN] = [0x01, 0x01];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    Snapshot,
    Invalid([u8; COMMAND_LEN]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotStatus {
    Success,
    Failure,
}

impl SnapshotStatus {
    pub fn from_outcome(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Success => b'S',
            Self::Failure => b'F',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'S' => Some(Self::Success),
            b'F' => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Reassembles 2-byte commands from split reads. An unknown command
/// discards everything buffered.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    pending: Vec<u8>,
}

impl CommandBuffer {
    pub fn push(&mut self, data: &[u8]) -> Vec<ClientCommand> {
        self.pending.extend_from_slice(data);
        let mut commands = Vec::new();
        while self.pending.len() >= COMMAND_LEN {
            let mut raw = [0u8; COMMAND_LEN];
            raw.copy_from_slice(&self.pending[..COMMAND_LEN]);
            self.pending.drain(..COMMAND_LEN);
            if raw == SNAPSHOT_COMMAND {
                commands.push(ClientCommand::Snapshot);
            } else {
                commands.push(ClientCommand::Invalid(raw));
                self.pending.clear();
            }
        }
        commands
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
