//! Script files on the internal card.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{ScriptError, ScriptPlan, clip_name};
use crate::config::{MAX_SCRIPTS, SCRIPTS_DIR, SCRIPT_NAME_MAX};
use crate::storage::{Volume, read_file, write_file};

/// Listing order for the script browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Name ascending.
    #[default]
    Name,
    /// Most recently used first.
    LastUsed,
    /// Newest first.
    DateCreated,
}

impl SortOrder {
    /// Settings-block encoding.
    pub const fn code(self) -> u8 {
        match self {
            Self::Name => 0,
            Self::LastUsed => 1,
            Self::DateCreated => 2,
        }
    }

    /// Unknown codes fall back to [`SortOrder::Name`].
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::LastUsed,
            2 => Self::DateCreated,
            _ => Self::Name,
        }
    }
}

/// One row of the script listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub name: String,
    pub filename: String,
    pub date_created: u64,
    pub last_used: u64,
}

fn check_name(name: &str) -> Result<&str, ScriptError> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name.len() > SCRIPT_NAME_MAX {
        return Err(ScriptError::InvalidName);
    }
    Ok(name)
}

pub fn script_path(name: &str) -> Result<String, ScriptError> {
    Ok(format!("{}/{}.json", SCRIPTS_DIR, check_name(name)?))
}

/// Load `/scripts/<name>.json`.
///
/// The plan is named after the file it came from, whatever its `name` field
/// says, so later saves go back to the same file.
pub fn load<V: Volume>(volume: &mut V, name: &str) -> Result<ScriptPlan, ScriptError> {
    let path = script_path(name)?;
    if !volume.exists(&path) {
        return Err(ScriptError::NotFound);
    }
    let bytes = read_file(volume, &path)?;
    let mut plan = ScriptPlan::from_json(&bytes)?;
    if plan.name.as_str() != name.trim() {
        warn!("{} is named '{}' inside; using the file name", path, plan.name);
        plan.name = clip_name(name.trim());
    }
    info!("Read {}", path);
    Ok(plan)
}

pub fn save<V: Volume>(volume: &mut V, plan: &ScriptPlan) -> Result<(), ScriptError> {
    let path = script_path(&plan.name)?;
    let bytes = plan.to_json()?;
    write_file(volume, &path, &bytes)?;
    info!("Saved {}", path);
    Ok(())
}

pub fn delete<V: Volume>(volume: &mut V, name: &str) -> Result<(), ScriptError> {
    let path = script_path(name)?;
    if !volume.exists(&path) {
        return Err(ScriptError::NotFound);
    }
    volume.remove(&path)?;
    info!("Deleted {}", path);
    Ok(())
}

/// Stamp `last_used` and write the plan back.
pub fn mark_used<V: Volume>(
    volume: &mut V,
    plan: &mut ScriptPlan,
    epoch_secs: u64,
) -> Result<(), ScriptError> {
    plan.last_used = epoch_secs;
    save(volume, plan)
}

/// List up to [`MAX_SCRIPTS`] scripts in the requested order.
///
/// Files that fail to parse are listed with default timestamps so they can
/// still be deleted from the browser.
pub fn list<V: Volume>(volume: &mut V, order: SortOrder) -> Result<Vec<ScriptEntry>, ScriptError> {
    let mut entries = Vec::new();
    for filename in volume.list(SCRIPTS_DIR)? {
        let Some(stem) = filename.strip_suffix(".json") else {
            continue;
        };
        if entries.len() == MAX_SCRIPTS {
            warn!("Script listing truncated at {} entries", MAX_SCRIPTS);
            break;
        }
        let path = format!("{}/{}", SCRIPTS_DIR, filename);
        let plan = read_file(volume, &path)
            .ok()
            .and_then(|bytes| ScriptPlan::from_json(&bytes).ok())
            .unwrap_or_else(|| ScriptPlan::new(stem));
        entries.push(ScriptEntry {
            name: String::from(stem),
            filename: filename.clone(),
            date_created: plan.date_created,
            last_used: plan.last_used,
        });
    }

    match order {
        SortOrder::Name => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        SortOrder::LastUsed => entries.sort_by(|a, b| b.last_used.cmp(&a.last_used)),
        SortOrder::DateCreated => entries.sort_by(|a, b| b.date_created.cmp(&a.date_created)),
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemVolume;
    use crate::storage::StorageError;

    fn volume_with(plans: &[(&str, u64, u64)]) -> MemVolume {
        let mut vol = MemVolume::new();
        vol.mount().unwrap();
        for &(name, created, used) in plans {
            let mut plan = ScriptPlan::new(name);
            plan.date_created = created;
            plan.last_used = used;
            save(&mut vol, &plan).unwrap();
        }
        vol
    }

    fn names(entries: &[ScriptEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_sort_orders() {
        let mut vol = volume_with(&[("bravo", 300, 10), ("alpha", 100, 30), ("charlie", 200, 20)]);
        let by_name = list(&mut vol, SortOrder::Name).unwrap();
        assert_eq!(names(&by_name), ["alpha", "bravo", "charlie"]);
        assert_eq!(by_name[0].filename, "alpha.json");

        let by_used = list(&mut vol, SortOrder::LastUsed).unwrap();
        assert_eq!(names(&by_used), ["alpha", "charlie", "bravo"]);

        let by_created = list(&mut vol, SortOrder::DateCreated).unwrap();
        assert_eq!(names(&by_created), ["bravo", "charlie", "alpha"]);
    }

    #[test]
    fn test_listing_is_capped() {
        let mut vol = MemVolume::new();
        vol.mount().unwrap();
        for i in 0..(MAX_SCRIPTS + 5) {
            save(&mut vol, &ScriptPlan::new(&format!("s{:02}", i))).unwrap();
        }
        assert_eq!(list(&mut vol, SortOrder::Name).unwrap().len(), MAX_SCRIPTS);
    }

    #[test]
    fn test_missing_script_leaves_nothing_loaded() {
        let mut vol = volume_with(&[]);
        assert_eq!(load(&mut vol, "ghost"), Err(ScriptError::NotFound));
        assert_eq!(delete(&mut vol, "ghost"), Err(ScriptError::NotFound));
        assert_eq!(load(&mut vol, "../etc"), Err(ScriptError::InvalidName));
    }

    #[test]
    fn test_mark_used_persists() {
        let mut vol = volume_with(&[("burn", 1, 2)]);
        let mut plan = load(&mut vol, "burn").unwrap();
        mark_used(&mut vol, &mut plan, 1_760_000_000).unwrap();
        assert_eq!(load(&mut vol, "burn").unwrap().last_used, 1_760_000_000);
    }

    #[test]
    fn test_plan_named_after_its_file() {
        let mut vol = volume_with(&[("Other", 1, 2)]);
        let bytes = read_file(&mut vol, "/scripts/Other.json").unwrap();
        write_file(&mut vol, "/scripts/burn.json", &bytes).unwrap();
        vol.remove("/scripts/Other.json").unwrap();

        let mut plan = load(&mut vol, "burn").unwrap();
        assert_eq!(plan.name.as_str(), "burn");
        mark_used(&mut vol, &mut plan, 1_760_000_000).unwrap();
        assert_eq!(vol.list(SCRIPTS_DIR).unwrap(), ["burn.json"], "no stray copy");
        assert_eq!(load(&mut vol, "burn").unwrap().last_used, 1_760_000_000);
    }

    #[test]
    fn test_unnamed_plan_can_be_stamped() {
        let mut vol = volume_with(&[]);
        write_file(&mut vol, "/scripts/quiet.json", br#"{"name":""}"#).unwrap();
        let mut plan = load(&mut vol, "quiet").unwrap();
        assert_eq!(mark_used(&mut vol, &mut plan, 5), Ok(()));
    }

    #[test]
    fn test_ejected_card_surfaces_storage_error() {
        let mut vol = volume_with(&[("burn", 1, 2)]);
        vol.eject();
        assert_eq!(
            list(&mut vol, SortOrder::Name),
            Err(ScriptError::Storage(StorageError::NotPresent))
        );
    }
}
