use strum::{Display, EnumIter, IntoEnumIterator};

/// A supported game release.
///
/// Numbering follows the conventional shorthand: decimal-point releases are
/// written without the point (9.5 is 95, 12.8 is 128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Version {
    /// 2
    Th02,
    /// 3
    Th03,
    /// 4
    Th04,
    /// 5
    Th05,
    /// 6
    Th06,
    /// 7
    Th07,
    /// 8
    Th08,
    /// 9
    Th09,
    /// 9.5
    Th095,
    /// 10
    Th10,
    /// 10.3
    Th103,
    /// 11
    Th11,
    /// 12
    Th12,
    /// 12.5
    Th125,
    /// 12.8
    Th128,
    /// 13
    Th13,
    /// 14
    Th14,
    /// 14.3
    Th143,
    /// 15
    Th15,
    /// 16
    Th16,
    /// 16.5
    Th165,
    /// 17
    Th17,
    /// 18
    Th18,
}

impl Version {
    /// The conventional version number.
    pub fn number(self) -> u32 {
        match self {
            Version::Th02 => 2,
            Version::Th03 => 3,
            Version::Th04 => 4,
            Version::Th05 => 5,
            Version::Th06 => 6,
            Version::Th07 => 7,
            Version::Th08 => 8,
            Version::Th09 => 9,
            Version::Th095 => 95,
            Version::Th10 => 10,
            Version::Th103 => 103,
            Version::Th11 => 11,
            Version::Th12 => 12,
            Version::Th125 => 125,
            Version::Th128 => 128,
            Version::Th13 => 13,
            Version::Th14 => 14,
            Version::Th143 => 143,
            Version::Th15 => 15,
            Version::Th16 => 16,
            Version::Th165 => 165,
            Version::Th17 => 17,
            Version::Th18 => 18,
        }
    }

    /// Look a version up by its conventional number.
    pub fn from_number(number: u32) -> Option<Version> {
        Version::iter().find(|v| v.number() == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_round_trip() {
        for v in Version::iter() {
            assert_eq!(Version::from_number(v.number()), Some(v));
        }
        assert_eq!(Version::from_number(99), None);
    }

    #[test]
    fn display_uses_shorthand() {
        assert_eq!(Version::Th095.to_string(), "th095");
        assert_eq!(Version::Th128.to_string(), "th128");
    }
}
