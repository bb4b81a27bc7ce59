//! Firmware upgrade status codes reported by the device.

use std::fmt;

/// Status returned by `UpgradeReport` (low nibble of the report word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeStatus {
    Reset,
    Ready,
    Verifying,
    Erasing00,
    Erasing25,
    Erasing50,
    Erasing75,
    Writing00,
    Writing25,
    Writing50,
    Writing75,
    Success,
    GeneralFail,
    BadVariant,
    VerifyFail,
    Unknown(u8),
}

impl UpgradeStatus {
    /// Number of steps on the progress scale (Verifying .. Success).
    pub const PROGRESS_STEPS: u8 = 11;

    pub fn from_report(word: u32) -> Self {
        match (word & 0xF) as u8 {
            0 => Self::Reset,
            1 => Self::Ready,
            2 => Self::Verifying,
            3 => Self::Erasing00,
            4 => Self::Erasing25,
            5 => Self::Erasing50,
            6 => Self::Erasing75,
            7 => Self::Writing00,
            8 => Self::Writing25,
            9 => Self::Writing50,
            10 => Self::Writing75,
            12 => Self::Success,
            13 => Self::GeneralFail,
            14 => Self::BadVariant,
            15 => Self::VerifyFail,
            n => Self::Unknown(n),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::Ready => 1,
            Self::Verifying => 2,
            Self::Erasing00 => 3,
            Self::Erasing25 => 4,
            Self::Erasing50 => 5,
            Self::Erasing75 => 6,
            Self::Writing00 => 7,
            Self::Writing25 => 8,
            Self::Writing50 => 9,
            Self::Writing75 => 10,
            Self::Success => 12,
            Self::GeneralFail => 13,
            Self::BadVariant => 14,
            Self::VerifyFail => 15,
            Self::Unknown(n) => n,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::GeneralFail | Self::BadVariant | Self::VerifyFail
        )
    }

    /// Position on the progress scale, if this status has one.
    pub fn progress_step(self) -> Option<u8> {
        match self {
            Self::Verifying => Some(1),
            Self::Erasing00 => Some(2),
            Self::Erasing25 => Some(3),
            Self::Erasing50 => Some(4),
            Self::Erasing75 => Some(5),
            Self::Writing00 => Some(6),
            Self::Writing25 => Some(7),
            Self::Writing50 => Some(8),
            Self::Writing75 => Some(9),
            Self::Success => Some(10),
            _ => None,
        }
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "reset"),
            Self::Ready => write!(f, "ready"),
            Self::Verifying => write!(f, "verifying"),
            Self::Erasing00 => write!(f, "erasing (0%)"),
            Self::Erasing25 => write!(f, "erasing (25%)"),
            Self::Erasing50 => write!(f, "erasing (50%)"),
            Self::Erasing75 => write!(f, "erasing (75%)"),
            Self::Writing00 => write!(f, "writing (0%)"),
            Self::Writing25 => write!(f, "writing (25%)"),
            Self::Writing50 => write!(f, "writing (50%)"),
            Self::Writing75 => write!(f, "writing (75%)"),
            Self::Success => write!(f, "success"),
            Self::GeneralFail => write!(f, "general failure"),
            Self::BadVariant => write!(f, "wrong hardware variant"),
            Self::VerifyFail => write!(f, "firmware verification failure"),
            Self::Unknown(n) => write!(f, "unknown status ({})", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_report_masks_low_nibble() {
        assert_eq!(UpgradeStatus::from_report(0x0000_0001), UpgradeStatus::Ready);
        assert_eq!(UpgradeStatus::from_report(0xDEAD_BEEC), UpgradeStatus::Success);
        assert_eq!(UpgradeStatus::from_report(11), UpgradeStatus::Unknown(11));
    }

    #[test]
    fn test_terminal_set() {
        let terminal: Vec<u8> = (0..16u32)
            .map(UpgradeStatus::from_report)
            .filter(|s| s.is_terminal())
            .map(UpgradeStatus::code)
            .collect();
        assert_eq!(terminal, vec![12, 13, 14, 15]);
    }

    #[test]
    fn test_progress_steps_are_ordered() {
        let steps: Vec<u8> = (2..=12u32)
            .filter_map(|c| UpgradeStatus::from_report(c).progress_step())
            .collect();
        assert_eq!(steps, (1..=10).collect::<Vec<u8>>());
        assert_eq!(UpgradeStatus::Ready.progress_step(), None);
    }
}
