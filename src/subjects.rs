//! Subjects in the study and the coordinate frame each was trained in

use serde::{Deserialize, Serialize};

use crate::angles::{clock_to_world_angle, platform_relative};

/// Coordinate frame in which a task rule (or a model) is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Egocentric: relative to the platform (head)
    Head,
    /// Allocentric: relative to the room
    World,
}

impl Frame {
    pub fn label(self) -> &'static str {
        match self {
            Frame::Head => "Head",
            Frame::World => "World",
        }
    }

    pub fn parse(raw: &str) -> Option<Frame> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "head" => Some(Frame::Head),
            "world" => Some(Frame::World),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub num: u32,
    pub name: &'static str,
    /// Display colour (hex)
    pub color: &'static str,
    pub task: Frame,
    /// Trained test locations: clock indices for World, head angles for Head
    pub valid_loc: &'static [i32],
    pub training: &'static str,
}

pub const SUBJECTS: [Subject; 7] = [
    Subject {
        num: 1701,
        name: "Pendleton",
        color: "#517e97",
        task: Frame::World,
        valid_loc: &[6, 12],
        training: "North=>East,South=>West",
    },
    Subject {
        num: 1703,
        name: "Grainger",
        color: "#586ebd",
        task: Frame::World,
        valid_loc: &[6, 12],
        training: "North=>East,South=>West",
    },
    Subject {
        num: 1811,
        name: "Dory",
        color: "#4e4bc9",
        task: Frame::World,
        valid_loc: &[6, 12],
        training: "North=>East,South=>West",
    },
    Subject {
        num: 1902,
        name: "Eclair",
        color: "#293457",
        task: Frame::World,
        valid_loc: &[5, 11],
        training: "SouthEast=>East,NorthWest=>West",
    },
    Subject {
        num: 1810,
        name: "Ursula",
        color: "#c54450",
        task: Frame::Head,
        valid_loc: &[-90, 90],
        training: "Left=>Left,Right=>Right",
    },
    Subject {
        num: 1901,
        name: "Crumble",
        color: "#cc438f",
        task: Frame::Head,
        valid_loc: &[-180, 0, 180],
        training: "Back=>Left,Front=>Right",
    },
    Subject {
        num: 1905,
        name: "Sponge",
        color: "#d5462c",
        task: Frame::Head,
        valid_loc: &[-180, 0, 180],
        training: "Back=>Left,Front=>Right",
    },
];

impl Subject {
    /// Stem of the formatted data file, e.g. `F1905_Sponge`.
    pub fn file_stem(&self) -> String {
        format!("F{}_{}", self.num, self.name)
    }

    /// Whether a sound at `world_angle` with the platform at `platform_angle`
    /// comes from a trained (non-probe) location for this subject.
    pub fn is_test_location(&self, world_angle: i32, platform_angle: i32) -> bool {
        match self.task {
            Frame::World => self
                .valid_loc
                .iter()
                .any(|&clock| clock_to_world_angle(clock) == world_angle),
            Frame::Head => {
                let head = platform_relative(world_angle, platform_angle);
                self.valid_loc.contains(&head)
            }
        }
    }

    /// Parse the colour as RGB components.
    pub fn rgb(&self) -> (u8, u8, u8) {
        parse_hex_color(self.color).unwrap_or((0, 0, 0))
    }
}

pub fn parse_hex_color(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some((r, g, b))
}

/// Subjects tested on `task`, optionally restricted to one training rule.
pub fn members(task: Frame, training: Option<&str>) -> Vec<Subject> {
    SUBJECTS
        .iter()
        .filter(|s| s.task == task)
        .filter(|s| training.map_or(true, |rule| s.training == rule))
        .copied()
        .collect()
}

pub fn find(name: &str) -> Option<Subject> {
    SUBJECTS
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name) || s.file_stem() == name)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_by_task_and_training() {
        assert_eq!(members(Frame::Head, None).len(), 3);
        assert_eq!(members(Frame::World, None).len(), 4);

        let world = members(Frame::World, Some("North=>East,South=>West"));
        let names: Vec<&str> = world.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Pendleton", "Grainger", "Dory"]);
    }

    #[test]
    fn test_file_stem_and_lookup() {
        let sponge = find("sponge").unwrap();
        assert_eq!(sponge.file_stem(), "F1905_Sponge");
        assert_eq!(find("F1701_Pendleton").map(|s| s.num), Some(1701));
        assert!(find("nobody").is_none());
    }

    #[test]
    fn test_world_task_locations_use_clock_indices() {
        let pendleton = find("Pendleton").unwrap();
        // Clock 12 is -180 and clock 6 is 0 whatever the platform rotation
        assert!(pendleton.is_test_location(-180, 90));
        assert!(pendleton.is_test_location(0, -150));
        assert!(!pendleton.is_test_location(90, 0));
    }

    #[test]
    fn test_head_task_locations_follow_platform() {
        let ursula = find("Ursula").unwrap();
        assert!(ursula.is_test_location(0, 90));
        assert!(ursula.is_test_location(180 - 30, -120));
        assert!(!ursula.is_test_location(0, 0));
    }

    #[test]
    fn test_colors_parse() {
        assert_eq!(find("Sponge").unwrap().rgb(), (0xd5, 0x46, 0x2c));
        assert_eq!(parse_hex_color("517e97"), None);
        assert_eq!(parse_hex_color("#zz0000"), None);
        // six bytes, but not six hex digits
        assert_eq!(parse_hex_color("#a\u{e9}aaa"), None);
    }
}
