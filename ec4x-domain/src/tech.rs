use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Research fields. Each level gates ship classes, modifies combat and
/// economic output, and scales facility capacity.
#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TechField {
    /// Economic level
    El,
    /// Science level
    Sl,
    /// Construction
    Cst,
    /// Weapons
    Wep,
    /// Terraforming
    Ter,
    /// Electronic intelligence
    Eli,
    /// Cloaking
    Clk,
    /// Shields
    Sld,
    /// Counter-intelligence
    Cic,
    /// Fighter doctrine
    Fd,
    /// Advanced colonization
    Aco,
    /// Fleet command
    Fc,
    /// Strategic command
    Sc,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TechTree {
    levels: BTreeMap<TechField, u8>,
    progress: BTreeMap<TechField, i64>,
}

impl Default for TechTree {
    fn default() -> Self {
        let levels = TechField::iter().map(|f| (f, 1)).collect();
        let progress = TechField::iter().map(|f| (f, 0)).collect();
        Self { levels, progress }
    }
}

impl TechTree {
    pub fn level(&self, field: TechField) -> u8 {
        self.levels.get(&field).copied().unwrap_or(1)
    }

    pub fn progress(&self, field: TechField) -> i64 {
        self.progress.get(&field).copied().unwrap_or(0)
    }

    /// Adds research points to a field's bucket and advances the level each
    /// time the next threshold is reached, carrying spillover forward.
    /// Returns the number of levels gained.
    pub fn invest(&mut self, field: TechField, points: i64, threshold_for: impl Fn(u8) -> i64, max_level: u8) -> u8 {
        let bucket = self.progress.entry(field).or_insert(0);
        *bucket += points;

        let level = self.levels.entry(field).or_insert(1);
        let mut gained = 0;
        while *level < max_level {
            let needed = threshold_for(*level + 1);
            if *bucket < needed {
                break;
            }
            *bucket -= needed;
            *level += 1;
            gained += 1;
        }
        gained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(level: u8) -> i64 {
        100 * level as i64
    }

    #[test]
    fn invest_advances_level_and_keeps_spillover() {
        let mut tree = TechTree::default();
        assert_eq!(tree.level(TechField::Wep), 1);

        // level 2 costs 200; 250 points advance once and leave 50 in the bucket
        let gained = tree.invest(TechField::Wep, 250, threshold, 10);
        assert_eq!(gained, 1);
        assert_eq!(tree.level(TechField::Wep), 2);
        assert_eq!(tree.progress(TechField::Wep), 50);
    }

    #[test]
    fn invest_respects_max_level() {
        let mut tree = TechTree::default();
        let gained = tree.invest(TechField::Fc, 1_000_000, threshold, 3);
        assert_eq!(gained, 2);
        assert_eq!(tree.level(TechField::Fc), 3);
    }

    #[test]
    fn field_names_parse_lowercase() {
        assert_eq!("wep".parse::<TechField>().unwrap(), TechField::Wep);
        assert_eq!("sc".parse::<TechField>().unwrap(), TechField::Sc);
        assert!("warp".parse::<TechField>().is_err());
    }
}
