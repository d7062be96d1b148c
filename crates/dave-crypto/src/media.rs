//! Media type of a frame.

/// Kind of media carried by a frame.
///
/// Bound into the AEAD associated data, so a frame sealed as audio does not
/// open as video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Audio frame
    #[default]
    Audio,
    /// Video frame
    Video,
}

impl MediaType {
    /// Raw wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }
}

impl TryFrom<u8> for MediaType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Audio),
            1 => Ok(Self::Video),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_both_ways() {
        assert_eq!(MediaType::try_from(MediaType::Audio.code()), Ok(MediaType::Audio));
        assert_eq!(MediaType::try_from(MediaType::Video.code()), Ok(MediaType::Video));
        assert_eq!(MediaType::try_from(9), Err(9));
    }
}
