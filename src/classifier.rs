use serde::{Deserialize, Serialize};

use crate::types::PositionGroup;

/// Roster metadata published upstream for a player. Any field may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerBio {
    pub player_id: u64,
    /// Free-form position text such as "G-F", "Center", "PG".
    pub position: Option<String>,
    pub height_inches: Option<u32>,
}

/// Everything the classifier gets to look at for one player.
#[derive(Debug, Clone, Default)]
pub struct PlayerProfile<'a> {
    pub player_id: u64,
    pub position: Option<&'a str>,
    pub height_inches: Option<u32>,
    pub ast_per_game: Option<f64>,
    pub reb_per_game: Option<f64>,
}

/// Assigns a single position group to a player.
pub trait PositionClassifier: Send + Sync {
    fn classify(&self, profile: &PlayerProfile<'_>) -> PositionGroup;
}

/// Position text first, then height, then a per-game assist/rebound profile.
/// Falls back to Guards when nothing is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProfileClassifier;

const GUARD_MAX_HEIGHT_IN: u32 = 77;
const CENTER_MIN_HEIGHT_IN: u32 = 82;
const GUARD_MIN_AST: f64 = 4.0;
const CENTER_MIN_REB: f64 = 7.0;

impl PositionClassifier for ProfileClassifier {
    fn classify(&self, profile: &PlayerProfile<'_>) -> PositionGroup {
        if let Some(group) = profile
            .position
            .and_then(|p| map_position_groups(p).into_iter().next())
        {
            return group;
        }

        if let Some(height) = profile.height_inches {
            return if height <= GUARD_MAX_HEIGHT_IN {
                PositionGroup::Guards
            } else if height >= CENTER_MIN_HEIGHT_IN {
                PositionGroup::Centers
            } else {
                PositionGroup::Forwards
            };
        }

        match (profile.ast_per_game, profile.reb_per_game) {
            (None, None) => PositionGroup::Guards,
            (Some(ast), _) if ast >= GUARD_MIN_AST => PositionGroup::Guards,
            (_, Some(reb)) if reb >= CENTER_MIN_REB => PositionGroup::Centers,
            _ => PositionGroup::Forwards,
        }
    }
}

/// Every group named by a position string, in order of appearance.
/// `"G-F"` → `[Guards, Forwards]`, `"Center"` → `[Centers]`.
pub fn map_position_groups(position: &str) -> Vec<PositionGroup> {
    let normalized = position.to_ascii_uppercase().replace('/', "-");
    let mut groups = Vec::new();
    let mut push = |g: PositionGroup| {
        if !groups.contains(&g) {
            groups.push(g);
        }
    };

    for part in normalized.split('-').map(str::trim).filter(|p| !p.is_empty()) {
        match part {
            "PG" | "SG" | "G" | "GUARD" => push(PositionGroup::Guards),
            "SF" | "PF" | "F" | "FORWARD" => push(PositionGroup::Forwards),
            "C" | "CENTER" => push(PositionGroup::Centers),
            _ => {}
        }
    }
    if normalized.contains("GUARD") {
        push(PositionGroup::Guards);
    }
    if normalized.contains("FORWARD") {
        push(PositionGroup::Forwards);
    }
    if normalized.contains("CENTER") {
        push(PositionGroup::Centers);
    }
    groups
}

/// `"6-11"` → 83. Plain inch counts are accepted too.
pub fn parse_height_inches(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some((feet, inches)) = text.split_once('-') {
        let feet: u32 = feet.trim().parse().ok()?;
        let inches: u32 = inches.trim().parse().ok()?;
        return Some(feet * 12 + inches);
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(profile: PlayerProfile<'_>) -> PositionGroup {
        ProfileClassifier.classify(&profile)
    }

    #[test]
    fn position_text_wins() {
        let p = PlayerProfile {
            position: Some("C-F"),
            height_inches: Some(70),
            ..Default::default()
        };
        assert_eq!(classify(p), PositionGroup::Centers);
        assert_eq!(
            map_position_groups("Guard-Forward"),
            vec![PositionGroup::Guards, PositionGroup::Forwards]
        );
        assert_eq!(map_position_groups("SG/SF"), vec![PositionGroup::Guards, PositionGroup::Forwards]);
        assert!(map_position_groups("").is_empty());
    }

    #[test]
    fn height_buckets() {
        let at = |h| classify(PlayerProfile { height_inches: Some(h), ..Default::default() });
        assert_eq!(at(77), PositionGroup::Guards);
        assert_eq!(at(78), PositionGroup::Forwards);
        assert_eq!(at(81), PositionGroup::Forwards);
        assert_eq!(at(82), PositionGroup::Centers);
    }

    #[test]
    fn per_game_profile_fallback() {
        let with = |ast, reb| {
            classify(PlayerProfile {
                ast_per_game: Some(ast),
                reb_per_game: Some(reb),
                ..Default::default()
            })
        };
        assert_eq!(with(6.5, 3.0), PositionGroup::Guards);
        assert_eq!(with(1.5, 9.0), PositionGroup::Centers);
        assert_eq!(with(2.0, 5.0), PositionGroup::Forwards);
        assert_eq!(classify(PlayerProfile::default()), PositionGroup::Guards);
    }

    #[test]
    fn parses_feet_inches() {
        assert_eq!(parse_height_inches("6-11"), Some(83));
        assert_eq!(parse_height_inches("79"), Some(79));
        assert_eq!(parse_height_inches("tall"), None);
    }
}
