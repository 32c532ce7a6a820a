//! Display key ids → screen-reader gesture names.
//!
//! Braille displays report keys as small integers.  The screen reader binds
//! commands to gesture names, so every key id the host can send is mapped
//! here.  Ids without a mapping produce no gesture and are dropped.

use std::fmt;

/// Highest key id treated as a cursor-routing key (one per cell).
pub const MAX_ROUTING_KEY: u16 = 80;

/// A named input gesture the screen reader can bind commands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    /// Cursor-routing key above cell `n` (1-based).
    Routing(u16),
    LeftArrow,
    RightArrow,
    UpArrow,
    DownArrow,
    Space,
    ScrollLeft,
    ScrollRight,
}

impl Gesture {
    /// Maps a display key id to its gesture, if it has one.
    pub fn from_key_id(key_id: u16) -> Option<Self> {
        match key_id {
            1..=MAX_ROUTING_KEY => Some(Gesture::Routing(key_id)),
            100 => Some(Gesture::LeftArrow),
            101 => Some(Gesture::RightArrow),
            102 => Some(Gesture::UpArrow),
            103 => Some(Gesture::DownArrow),
            110 => Some(Gesture::Space),
            120 => Some(Gesture::ScrollLeft),
            121 => Some(Gesture::ScrollRight),
            _ => None,
        }
    }

    /// The key id the host sends for this gesture.
    pub fn key_id(self) -> u16 {
        match self {
            Gesture::Routing(n) => n,
            Gesture::LeftArrow => 100,
            Gesture::RightArrow => 101,
            Gesture::UpArrow => 102,
            Gesture::DownArrow => 103,
            Gesture::Space => 110,
            Gesture::ScrollLeft => 120,
            Gesture::ScrollRight => 121,
        }
    }

    /// Zero-based cell index for routing keys.
    pub fn routing_cell(self) -> Option<usize> {
        match self {
            Gesture::Routing(n) => Some(usize::from(n) - 1),
            _ => None,
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gesture::Routing(n) => write!(f, "routing{n}"),
            Gesture::LeftArrow => f.write_str("leftArrow"),
            Gesture::RightArrow => f.write_str("rightArrow"),
            Gesture::UpArrow => f.write_str("upArrow"),
            Gesture::DownArrow => f.write_str("downArrow"),
            Gesture::Space => f.write_str("space"),
            Gesture::ScrollLeft => f.write_str("scrollLeft"),
            Gesture::ScrollRight => f.write_str("scrollRight"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_range_is_inclusive() {
        assert_eq!(Gesture::from_key_id(1), Some(Gesture::Routing(1)));
        assert_eq!(Gesture::from_key_id(80), Some(Gesture::Routing(80)));
        assert_eq!(Gesture::from_key_id(0), None);
        assert_eq!(Gesture::from_key_id(81), None);
    }

    #[test]
    fn test_navigation_keys_map_to_named_gestures() {
        assert_eq!(Gesture::from_key_id(100).map(|g| g.to_string()), Some("leftArrow".into()));
        assert_eq!(Gesture::from_key_id(110), Some(Gesture::Space));
        assert_eq!(Gesture::from_key_id(121), Some(Gesture::ScrollRight));
    }

    #[test]
    fn test_unmapped_key_ids_produce_no_gesture() {
        for id in [90, 104, 111, 122, u16::MAX] {
            assert_eq!(Gesture::from_key_id(id), None, "key id {id}");
        }
    }

    #[test]
    fn test_key_id_inverts_from_key_id() {
        for id in (1..=MAX_ROUTING_KEY).chain([100, 101, 102, 103, 110, 120, 121]) {
            let gesture = Gesture::from_key_id(id).expect("mapped");
            assert_eq!(gesture.key_id(), id);
        }
    }

    #[test]
    fn test_routing_cell_is_zero_based() {
        assert_eq!(Gesture::Routing(1).routing_cell(), Some(0));
        assert_eq!(Gesture::Space.routing_cell(), None);
    }

    #[test]
    fn test_routing_gesture_name_includes_cell_number() {
        assert_eq!(Gesture::Routing(12).to_string(), "routing12");
    }
}
