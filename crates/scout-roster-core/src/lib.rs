use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RosterError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("duplicate census code: {0}")]
    DuplicateKey(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("no effective change")]
    NoChange,
    #[error("backing store error: {0}")]
    BackingStore(String),
    #[error("connection error: {0}")]
    Connection(String),
}

pub const IDENTITY_COLUMN_COUNT: usize = 5;
pub const MILESTONE_COUNT: usize = 9;
pub const BADGE_SLOT_COUNT: usize = 15;
pub const BADGE_FIELDS_PER_SLOT: usize = 3;
pub const COLUMN_COUNT: usize =
    IDENTITY_COLUMN_COUNT + MILESTONE_COUNT + BADGE_SLOT_COUNT * BADGE_FIELDS_PER_SLOT;

/// Rows reserved at the top of the sheet for column headers.
pub const HEADER_ROWS: usize = 1;

/// Display value used when a record has no milestone or no visible badges.
pub const NONE_SENTINEL: &str = "none";

const BADGE_BASE_COLUMN: usize = IDENTITY_COLUMN_COUNT + MILESTONE_COUNT;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Milestone {
    Junior1,
    Junior2,
    Junior3,
    Discovery,
    Competence,
    Responsibility,
    Senior1,
    Senior2,
    Senior3,
}

impl Milestone {
    /// All stages in progression order, most junior first.
    pub const ALL: [Self; MILESTONE_COUNT] = [
        Self::Junior1,
        Self::Junior2,
        Self::Junior3,
        Self::Discovery,
        Self::Competence,
        Self::Responsibility,
        Self::Senior1,
        Self::Senior2,
        Self::Senior3,
    ];

    /// Records at or before this stage surface the junior badge catalog.
    pub const THRESHOLD: Self = Self::Junior3;

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Junior1 => "junior1",
            Self::Junior2 => "junior2",
            Self::Junior3 => "junior3",
            Self::Discovery => "discovery",
            Self::Competence => "competence",
            Self::Responsibility => "responsibility",
            Self::Senior1 => "senior1",
            Self::Senior2 => "senior2",
            Self::Senior3 => "senior3",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "junior1" => Some(Self::Junior1),
            "junior2" => Some(Self::Junior2),
            "junior3" => Some(Self::Junior3),
            "discovery" => Some(Self::Discovery),
            "competence" => Some(Self::Competence),
            "responsibility" => Some(Self::Responsibility),
            "senior1" => Some(Self::Senior1),
            "senior2" => Some(Self::Senior2),
            "senior3" => Some(Self::Senior3),
            _ => None,
        }
    }

    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            Self::Junior1 => "Junior Stage 1",
            Self::Junior2 => "Junior Stage 2",
            Self::Junior3 => "Junior Stage 3",
            Self::Discovery => "Discovery",
            Self::Competence => "Competence",
            Self::Responsibility => "Responsibility",
            Self::Senior1 => "Senior Stage 1",
            Self::Senior2 => "Senior Stage 2",
            Self::Senior3 => "Senior Stage 3",
        }
    }

    /// Position in the progression ordering; the absent milestone counts as 0.
    #[must_use]
    pub fn position(self) -> usize {
        1 + Self::ALL
            .iter()
            .position(|stage| *stage == self)
            .unwrap_or_default()
    }
}

impl Display for Milestone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BadgeCategory {
    Junior,
    Senior,
}

impl BadgeCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Senior => "senior",
        }
    }

    /// Lenient cell parse: empty or unrecognized values map to unset.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "junior" => Some(Self::Junior),
            "senior" => Some(Self::Senior),
            _ => None,
        }
    }
}

impl Display for BadgeCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the 15 repeatable badge positions attached to a record.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct Slot(u8);

impl Slot {
    /// Builds a slot from its 1-based number.
    ///
    /// # Errors
    /// Returns [`RosterError::Validation`] when the number is outside 1..=15.
    pub fn new(number: u8) -> Result<Self, RosterError> {
        if (1..=15).contains(&number) {
            Ok(Self(number))
        } else {
            Err(RosterError::Validation(format!(
                "badge slot must be between 1 and 15, got {number}"
            )))
        }
    }

    #[must_use]
    pub fn number(self) -> usize {
        usize::from(self.0)
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        (1..=15).map(Self)
    }

    /// 0-based column of the slot's name cell.
    #[must_use]
    pub fn name_column(self) -> usize {
        BADGE_BASE_COLUMN + (self.number() - 1) * BADGE_FIELDS_PER_SLOT
    }

    #[must_use]
    pub fn description_column(self) -> usize {
        self.name_column() + 1
    }

    #[must_use]
    pub fn category_column(self) -> usize {
        self.name_column() + 2
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct BadgeSlot {
    pub name: String,
    pub description: String,
    pub category: Option<BadgeCategory>,
}

impl BadgeSlot {
    /// A slot is empty when its name trims to nothing, whatever the other
    /// two cells contain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// One row of the backing sheet. Empty string is the canonical unset value
/// for every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScoutRecord {
    pub first_name: String,
    pub last_name: String,
    pub census_code: String,
    pub birth_year: String,
    pub unit: String,
    pub stages: [String; MILESTONE_COUNT],
    pub badges: [BadgeSlot; BADGE_SLOT_COUNT],
}

impl ScoutRecord {
    /// Maps a raw sheet row onto the typed schema; missing cells default to
    /// empty string.
    #[must_use]
    pub fn from_row(row: &[String]) -> Self {
        let cell = |index: usize| row.get(index).cloned().unwrap_or_default();

        let mut stages: [String; MILESTONE_COUNT] = Default::default();
        for (offset, value) in stages.iter_mut().enumerate() {
            *value = cell(IDENTITY_COLUMN_COUNT + offset);
        }

        let mut badges: [BadgeSlot; BADGE_SLOT_COUNT] = Default::default();
        for (slot, badge) in Slot::iter().zip(badges.iter_mut()) {
            *badge = BadgeSlot {
                name: cell(slot.name_column()),
                description: cell(slot.description_column()),
                category: BadgeCategory::parse(&cell(slot.category_column())),
            };
        }

        Self {
            first_name: cell(0),
            last_name: cell(1),
            census_code: cell(2),
            birth_year: cell(3),
            unit: cell(4),
            stages,
            badges,
        }
    }

    /// Flattens the record back into sheet column order.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(COLUMN_COUNT);
        row.push(self.first_name.clone());
        row.push(self.last_name.clone());
        row.push(self.census_code.clone());
        row.push(self.birth_year.clone());
        row.push(self.unit.clone());
        row.extend(self.stages.iter().cloned());
        for badge in &self.badges {
            row.push(badge.name.clone());
            row.push(badge.description.clone());
            row.push(badge.category.map_or_else(String::new, |category| {
                category.as_str().to_string()
            }));
        }
        row
    }

    #[must_use]
    pub fn stage_value(&self, stage: Milestone) -> &str {
        &self.stages[stage.position() - 1]
    }
}

/// Identity and milestone columns addressable by a general-field update.
/// Badge slots have their own operation and are excluded on purpose.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum Field {
    FirstName,
    LastName,
    CensusCode,
    BirthYear,
    Unit,
    Stage(Milestone),
}

impl Field {
    /// 0-based sheet column of this field.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::FirstName => 0,
            Self::LastName => 1,
            Self::CensusCode => 2,
            Self::BirthYear => 3,
            Self::Unit => 4,
            Self::Stage(stage) => IDENTITY_COLUMN_COUNT + stage.position() - 1,
        }
    }

    #[must_use]
    pub fn value(self, record: &ScoutRecord) -> &str {
        match self {
            Self::FirstName => &record.first_name,
            Self::LastName => &record.last_name,
            Self::CensusCode => &record.census_code,
            Self::BirthYear => &record.birth_year,
            Self::Unit => &record.unit,
            Self::Stage(stage) => record.stage_value(stage),
        }
    }
}

/// Header names for all 59 columns, in sheet order.
#[must_use]
pub fn column_headers() -> Vec<String> {
    let mut headers = vec![
        "First Name".to_string(),
        "Last Name".to_string(),
        "Census Code".to_string(),
        "Birth Year".to_string(),
        "Unit".to_string(),
    ];
    for stage in Milestone::ALL {
        headers.push(stage.header().to_string());
    }
    for slot in Slot::iter() {
        headers.push(format!("Badge {slot} Name"));
        headers.push(format!("Badge {slot} Description"));
        headers.push(format!("Badge {slot} Category"));
    }
    headers
}

/// Highest-ordered milestone with a non-empty trimmed value, or `None` when
/// the record has reached no milestone.
#[must_use]
pub fn current_milestone(record: &ScoutRecord) -> Option<Milestone> {
    Milestone::ALL
        .iter()
        .rev()
        .find(|stage| !record.stage_value(**stage).trim().is_empty())
        .copied()
}

/// Names of the badges the record should surface, in slot order.
///
/// The eligible catalog follows the current milestone: at or before
/// [`Milestone::THRESHOLD`] the junior catalog applies, past it the senior
/// one. Unset categories count as junior; rows created before the category
/// column existed rely on that.
#[must_use]
pub fn visible_badges(record: &ScoutRecord, current: Option<Milestone>) -> Vec<String> {
    let position = current.map_or(0, Milestone::position);
    let junior_eligible = position <= Milestone::THRESHOLD.position();

    let mut names = Vec::new();
    for badge in &record.badges {
        let name = badge.name.trim();
        if name.is_empty() {
            continue;
        }
        let visible = match badge.category {
            Some(BadgeCategory::Junior) | None => junior_eligible,
            Some(BadgeCategory::Senior) => !junior_eligible,
        };
        if visible {
            names.push(name.to_string());
        }
    }
    names
}

/// Read-side projection of a record: identity fields plus the two derived
/// display fields. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DisplayRow {
    pub first_name: String,
    pub last_name: String,
    pub census_code: String,
    pub birth_year: String,
    pub unit: String,
    pub milestone: String,
    pub badges: String,
}

#[must_use]
pub fn display_row(record: &ScoutRecord) -> DisplayRow {
    let current = current_milestone(record);
    let badges = visible_badges(record, current);
    DisplayRow {
        first_name: record.first_name.clone(),
        last_name: record.last_name.clone(),
        census_code: record.census_code.clone(),
        birth_year: record.birth_year.clone(),
        unit: record.unit.clone(),
        milestone: current.map_or(NONE_SENTINEL, Milestone::as_str).to_string(),
        badges: if badges.is_empty() {
            NONE_SENTINEL.to_string()
        } else {
            badges.join(", ")
        },
    }
}

/// A single positional cell write. Row and column are 1-indexed; row 1 is
/// the header row.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CellWrite {
    pub row: usize,
    pub column: usize,
    pub value: String,
}

/// Contract of the backing tabular store.
///
/// Data rows come back in sheet order, each aligned to the 59-column schema.
/// `delete_row` shifts every later row up by one. Implementations report
/// failures as [`RosterError::BackingStore`].
pub trait TabularStore {
    /// Full synchronous read of every data row.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when the read fails.
    fn fetch_all_rows(&self) -> Result<Vec<Vec<String>>, RosterError>;

    /// Appends one row after the last data row; values align positionally
    /// with the schema.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when the write fails.
    fn append_row(&mut self, values: &[String]) -> Result<(), RosterError>;

    /// Writes a batch of individual cells.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when any write fails.
    fn update_cells(&mut self, cells: &[CellWrite]) -> Result<(), RosterError>;

    /// Removes one row; subsequent positions shift up by one.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when the delete fails.
    fn delete_row(&mut self, row: usize) -> Result<(), RosterError>;
}

/// Record store adapter: resolves census codes to physical row positions and
/// performs the mutation operations against the backing store.
///
/// Owns the read-through snapshot of all records. Every mutation either
/// fully succeeds and reloads the snapshot, or fails and leaves it at the
/// last successfully loaded state.
pub struct Roster<S: TabularStore> {
    store: S,
    cache: Vec<ScoutRecord>,
}

impl<S: TabularStore> Roster<S> {
    /// Wraps a connected store and performs the initial load.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when the initial read fails.
    pub fn new(store: S) -> Result<Self, RosterError> {
        let mut roster = Self {
            store,
            cache: Vec::new(),
        };
        roster.reload()?;
        Ok(roster)
    }

    /// Rebuilds the snapshot from the backing store. The previous snapshot
    /// is kept when the fetch fails.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when the read fails.
    pub fn reload(&mut self) -> Result<(), RosterError> {
        let rows = self.store.fetch_all_rows()?;
        self.cache = rows.iter().map(|row| ScoutRecord::from_row(row)).collect();
        Ok(())
    }

    #[must_use]
    pub fn records(&self) -> &[ScoutRecord] {
        &self.cache
    }

    #[must_use]
    pub fn record_by_code(&self, key: &str) -> Option<&ScoutRecord> {
        let key = key.trim();
        self.cache
            .iter()
            .find(|record| record.census_code.trim() == key)
    }

    /// Physical 1-indexed sheet row of the first record whose trimmed census
    /// code equals the trimmed key.
    #[must_use]
    pub fn find_position(&self, key: &str) -> Option<usize> {
        let key = key.trim();
        self.cache
            .iter()
            .position(|record| record.census_code.trim() == key)
            .map(|index| index + HEADER_ROWS + 1)
    }

    /// Appends a new record.
    ///
    /// # Errors
    /// Returns [`RosterError::Validation`] when the census code is empty,
    /// [`RosterError::DuplicateKey`] when it collides with an existing
    /// record, and [`RosterError::BackingStore`] on store failure.
    pub fn add(&mut self, record: &ScoutRecord) -> Result<(), RosterError> {
        let code = record.census_code.trim();
        if code.is_empty() {
            return Err(RosterError::Validation(
                "census code is required".to_string(),
            ));
        }
        if self.find_position(code).is_some() {
            return Err(RosterError::DuplicateKey(code.to_string()));
        }

        let values: Vec<String> = record
            .to_row()
            .iter()
            .map(|value| value.trim().to_string())
            .collect();
        self.store.append_row(&values)?;
        self.reload()
    }

    /// Removes the record resolved by `key`.
    ///
    /// # Errors
    /// Returns [`RosterError::NotFound`] when the key misses and
    /// [`RosterError::BackingStore`] on store failure.
    pub fn delete(&mut self, key: &str) -> Result<(), RosterError> {
        let row = self
            .find_position(key)
            .ok_or_else(|| RosterError::NotFound(key.trim().to_string()))?;
        self.store.delete_row(row)?;
        self.reload()
    }

    /// Applies a minimal diff of identity/milestone fields to the record
    /// resolved by `key`. Only cells whose trimmed new value differs from
    /// the cached trimmed value are written.
    ///
    /// # Errors
    /// Returns [`RosterError::NotFound`] when the key misses,
    /// [`RosterError::DuplicateKey`] when renaming the census code onto a
    /// different existing record, [`RosterError::NoChange`] when the
    /// effective diff is empty (informational, not a fault), and
    /// [`RosterError::BackingStore`] on store failure.
    pub fn update_general(
        &mut self,
        key: &str,
        fields: &BTreeMap<Field, String>,
    ) -> Result<(), RosterError> {
        let key = key.trim();
        let row = self
            .find_position(key)
            .ok_or_else(|| RosterError::NotFound(key.to_string()))?;

        if let Some(new_code) = fields.get(&Field::CensusCode) {
            let new_code = new_code.trim();
            if new_code.is_empty() {
                return Err(RosterError::Validation(
                    "census code is required".to_string(),
                ));
            }
            let collides = new_code != key
                && self.cache.iter().any(|other| {
                    other.census_code.trim() != key && other.census_code.trim() == new_code
                });
            if collides {
                return Err(RosterError::DuplicateKey(new_code.to_string()));
            }
        }

        let record = &self.cache[row - HEADER_ROWS - 1];
        let mut cells = Vec::new();
        for (field, value) in fields {
            let new_value = value.trim();
            if new_value != field.value(record).trim() {
                cells.push(CellWrite {
                    row,
                    column: field.index() + 1,
                    value: new_value.to_string(),
                });
            }
        }
        if cells.is_empty() {
            return Err(RosterError::NoChange);
        }

        self.store.update_cells(&cells)?;
        self.reload()
    }

    /// Writes all three cells of the given badge slot unconditionally.
    ///
    /// # Errors
    /// Returns [`RosterError::NotFound`] when the key misses and
    /// [`RosterError::BackingStore`] on store failure.
    pub fn update_badge_slot(
        &mut self,
        key: &str,
        slot: Slot,
        name: &str,
        description: &str,
        category: Option<BadgeCategory>,
    ) -> Result<(), RosterError> {
        let row = self
            .find_position(key)
            .ok_or_else(|| RosterError::NotFound(key.trim().to_string()))?;

        let cells = [
            CellWrite {
                row,
                column: slot.name_column() + 1,
                value: name.trim().to_string(),
            },
            CellWrite {
                row,
                column: slot.description_column() + 1,
                value: description.trim().to_string(),
            },
            CellWrite {
                row,
                column: slot.category_column() + 1,
                value: category.map_or_else(String::new, |category| {
                    category.as_str().to_string()
                }),
            },
        ];
        self.store.update_cells(&cells)?;
        self.reload()
    }

    /// Clears a badge slot by writing three empty cells; there is no
    /// separate delete-slot primitive.
    ///
    /// # Errors
    /// Same conditions as [`Roster::update_badge_slot`].
    pub fn clear_badge_slot(&mut self, key: &str, slot: Slot) -> Result<(), RosterError> {
        self.update_badge_slot(key, slot, "", "", None)
    }

    /// Lowest slot number whose name cell is empty, or `None` when all 15
    /// are occupied.
    ///
    /// # Errors
    /// Returns [`RosterError::NotFound`] when the key misses.
    pub fn first_free_slot(&self, key: &str) -> Result<Option<Slot>, RosterError> {
        let record = self
            .record_by_code(key)
            .ok_or_else(|| RosterError::NotFound(key.trim().to_string()))?;
        Ok(Slot::iter().find(|slot| record.badges[slot.number() - 1].is_empty()))
    }

    /// Occupied badge slots of the record resolved by `key`, in slot order.
    ///
    /// # Errors
    /// Returns [`RosterError::NotFound`] when the key misses.
    pub fn badges_for(&self, key: &str) -> Result<Vec<(Slot, BadgeSlot)>, RosterError> {
        let record = self
            .record_by_code(key)
            .ok_or_else(|| RosterError::NotFound(key.trim().to_string()))?;
        Ok(Slot::iter()
            .filter_map(|slot| {
                let badge = &record.badges[slot.number() - 1];
                if badge.is_empty() {
                    None
                } else {
                    Some((slot, badge.clone()))
                }
            })
            .collect())
    }

    /// Case-insensitive substring filter on first and last name; both
    /// filters AND together and an empty query matches everything.
    #[must_use]
    pub fn search(&self, name_query: &str, surname_query: &str) -> Vec<&ScoutRecord> {
        let name_query = name_query.to_lowercase();
        let surname_query = surname_query.to_lowercase();
        self.cache
            .iter()
            .filter(|record| {
                record.first_name.to_lowercase().contains(&name_query)
                    && record.last_name.to_lowercase().contains(&surname_query)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn must<T>(result: Result<T, RosterError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn must_slot(number: u8) -> Slot {
        must(Slot::new(number))
    }

    /// Sheet fake backed by a row vector; counts individual cell writes so
    /// tests can assert the zero-write contract of empty diffs.
    #[derive(Default)]
    struct MemorySheet {
        rows: Vec<Vec<String>>,
        cell_writes: Rc<Cell<usize>>,
        fail_writes: bool,
    }

    impl MemorySheet {
        fn data_index(&self, row: usize) -> Result<usize, RosterError> {
            let index = row
                .checked_sub(HEADER_ROWS + 1)
                .ok_or_else(|| RosterError::BackingStore("row inside header".to_string()))?;
            if index < self.rows.len() {
                Ok(index)
            } else {
                Err(RosterError::BackingStore(format!("row {row} out of range")))
            }
        }
    }

    impl TabularStore for MemorySheet {
        fn fetch_all_rows(&self) -> Result<Vec<Vec<String>>, RosterError> {
            Ok(self.rows.clone())
        }

        fn append_row(&mut self, values: &[String]) -> Result<(), RosterError> {
            if self.fail_writes {
                return Err(RosterError::BackingStore("write refused".to_string()));
            }
            self.rows.push(values.to_vec());
            Ok(())
        }

        fn update_cells(&mut self, cells: &[CellWrite]) -> Result<(), RosterError> {
            if self.fail_writes {
                return Err(RosterError::BackingStore("write refused".to_string()));
            }
            for cell in cells {
                let index = self.data_index(cell.row)?;
                let row = &mut self.rows[index];
                if row.len() < COLUMN_COUNT {
                    row.resize(COLUMN_COUNT, String::new());
                }
                row[cell.column - 1] = cell.value.clone();
                self.cell_writes.set(self.cell_writes.get() + 1);
            }
            Ok(())
        }

        fn delete_row(&mut self, row: usize) -> Result<(), RosterError> {
            let index = self.data_index(row)?;
            let _ = self.rows.remove(index);
            Ok(())
        }
    }

    fn fixture_record(code: &str) -> ScoutRecord {
        ScoutRecord {
            first_name: "Ada".to_string(),
            last_name: "Rossi".to_string(),
            census_code: code.to_string(),
            birth_year: "2014".to_string(),
            unit: "Wolves".to_string(),
            ..ScoutRecord::default()
        }
    }

    fn must_record(roster: &Roster<MemorySheet>, key: &str) -> ScoutRecord {
        match roster.record_by_code(key) {
            Some(record) => record.clone(),
            None => panic!("record {key} missing from cache"),
        }
    }

    fn roster_with(records: &[ScoutRecord]) -> Roster<MemorySheet> {
        let sheet = MemorySheet {
            rows: records.iter().map(ScoutRecord::to_row).collect(),
            ..MemorySheet::default()
        };
        must(Roster::new(sheet))
    }

    #[test]
    fn milestone_is_none_when_no_stage_is_set() {
        let record = fixture_record("100");
        assert_eq!(current_milestone(&record), None);
    }

    #[test]
    fn milestone_picks_most_senior_non_empty_stage() {
        let mut record = fixture_record("100");
        record.stages[Milestone::Junior2.position() - 1] = "2022-05-01".to_string();
        record.stages[Milestone::Competence.position() - 1] = "2024-03-12".to_string();
        assert_eq!(current_milestone(&record), Some(Milestone::Competence));
    }

    #[test]
    fn whitespace_only_stage_counts_as_unset() {
        let mut record = fixture_record("100");
        record.stages[Milestone::Senior3.position() - 1] = "   ".to_string();
        record.stages[Milestone::Junior1.position() - 1] = "2020".to_string();
        assert_eq!(current_milestone(&record), Some(Milestone::Junior1));
    }

    #[test]
    fn junior_record_sees_junior_and_unset_badges_in_slot_order() {
        let mut record = fixture_record("100");
        record.badges[0] = BadgeSlot {
            name: "Cook".to_string(),
            description: String::new(),
            category: Some(BadgeCategory::Junior),
        };
        record.badges[2] = BadgeSlot {
            name: "Guide".to_string(),
            description: String::new(),
            category: None,
        };
        record.badges[3] = BadgeSlot {
            name: "Artist".to_string(),
            description: String::new(),
            category: Some(BadgeCategory::Senior),
        };

        let names = visible_badges(&record, Some(Milestone::Junior2));
        assert_eq!(names, vec!["Cook".to_string(), "Guide".to_string()]);
    }

    #[test]
    fn record_past_threshold_sees_only_senior_badges() {
        let mut record = fixture_record("100");
        record.badges[0] = BadgeSlot {
            name: "Cook".to_string(),
            description: String::new(),
            category: Some(BadgeCategory::Junior),
        };
        record.badges[1] = BadgeSlot {
            name: "Guide".to_string(),
            description: String::new(),
            category: None,
        };
        record.badges[2] = BadgeSlot {
            name: "Sailor".to_string(),
            description: String::new(),
            category: Some(BadgeCategory::Senior),
        };

        let names = visible_badges(&record, Some(Milestone::Discovery));
        assert_eq!(names, vec!["Sailor".to_string()]);
    }

    #[test]
    fn absent_milestone_defaults_to_junior_catalog() {
        let mut record = fixture_record("100");
        record.badges[0] = BadgeSlot {
            name: "Cook".to_string(),
            description: String::new(),
            category: Some(BadgeCategory::Junior),
        };
        let names = visible_badges(&record, None);
        assert_eq!(names, vec!["Cook".to_string()]);
    }

    #[test]
    fn duplicate_badge_names_are_not_deduplicated() {
        let mut record = fixture_record("100");
        for index in [0, 4] {
            record.badges[index] = BadgeSlot {
                name: "Cook".to_string(),
                description: String::new(),
                category: Some(BadgeCategory::Junior),
            };
        }
        let names = visible_badges(&record, None);
        assert_eq!(names, vec!["Cook".to_string(), "Cook".to_string()]);
    }

    #[test]
    fn display_row_uses_none_sentinels() {
        let record = fixture_record("100");
        let display = display_row(&record);
        assert_eq!(display.milestone, NONE_SENTINEL);
        assert_eq!(display.badges, NONE_SENTINEL);
    }

    #[test]
    fn row_round_trip_preserves_all_columns() {
        let mut record = fixture_record("100");
        record.stages[3] = "2023-11-02".to_string();
        record.badges[14] = BadgeSlot {
            name: "Astronomer".to_string(),
            description: "night hikes".to_string(),
            category: Some(BadgeCategory::Senior),
        };

        let row = record.to_row();
        assert_eq!(row.len(), COLUMN_COUNT);
        assert_eq!(ScoutRecord::from_row(&row), record);
    }

    #[test]
    fn short_row_is_padded_with_empty_cells() {
        let row = vec!["Ada".to_string(), "Rossi".to_string(), "7".to_string()];
        let record = ScoutRecord::from_row(&row);
        assert_eq!(record.census_code, "7");
        assert!(record.unit.is_empty());
        assert!(record.badges.iter().all(BadgeSlot::is_empty));
    }

    #[test]
    fn find_position_misses_on_empty_store_and_unknown_key() {
        let roster = roster_with(&[]);
        assert_eq!(roster.find_position("100"), None);

        let roster = roster_with(&[fixture_record("100")]);
        assert_eq!(roster.find_position("200"), None);
    }

    #[test]
    fn find_position_accounts_for_header_offset_and_trims() {
        let roster = roster_with(&[fixture_record("100"), fixture_record("200")]);
        assert_eq!(roster.find_position(" 200 "), Some(3));
    }

    #[test]
    fn add_then_find_resolves_the_new_key() {
        let mut roster = roster_with(&[]);
        must(roster.add(&fixture_record(" 300 ")));
        assert_eq!(roster.find_position("300"), Some(2));
        let record = roster.record_by_code("300");
        assert_eq!(record.map(|r| r.census_code.trim()), Some("300"));
    }

    #[test]
    fn add_with_empty_code_is_a_validation_error() {
        let mut roster = roster_with(&[]);
        let result = roster.add(&fixture_record("  "));
        assert_eq!(
            result,
            Err(RosterError::Validation("census code is required".to_string()))
        );
    }

    #[test]
    fn add_with_duplicate_code_leaves_row_count_unchanged() {
        let mut roster = roster_with(&[fixture_record("100")]);
        let result = roster.add(&fixture_record("100"));
        assert_eq!(result, Err(RosterError::DuplicateKey("100".to_string())));
        assert_eq!(roster.records().len(), 1);
    }

    #[test]
    fn delete_removes_exactly_one_row() {
        let mut roster = roster_with(&[fixture_record("100"), fixture_record("200")]);
        must(roster.delete("100"));
        assert_eq!(roster.records().len(), 1);
        assert_eq!(roster.find_position("100"), None);
        assert_eq!(roster.find_position("200"), Some(2));
    }

    #[test]
    fn delete_unknown_key_is_not_found() {
        let mut roster = roster_with(&[fixture_record("100")]);
        assert_eq!(
            roster.delete("999"),
            Err(RosterError::NotFound("999".to_string()))
        );
    }

    #[test]
    fn update_with_identical_values_reports_no_change_and_writes_nothing() {
        let sheet = MemorySheet {
            rows: vec![fixture_record("100").to_row()],
            ..MemorySheet::default()
        };
        let writes = Rc::clone(&sheet.cell_writes);
        let mut roster = must(Roster::new(sheet));

        let mut fields = BTreeMap::new();
        fields.insert(Field::FirstName, "Ada".to_string());
        fields.insert(Field::Unit, " Wolves ".to_string());

        assert_eq!(roster.update_general("100", &fields), Err(RosterError::NoChange));
        assert_eq!(writes.get(), 0);
    }

    #[test]
    fn update_writes_only_changed_cells() {
        let sheet = MemorySheet {
            rows: vec![fixture_record("100").to_row()],
            ..MemorySheet::default()
        };
        let writes = Rc::clone(&sheet.cell_writes);
        let mut roster = must(Roster::new(sheet));

        let mut fields = BTreeMap::new();
        fields.insert(Field::FirstName, "Ada".to_string());
        fields.insert(Field::LastName, "Bianchi".to_string());
        fields.insert(
            Field::Stage(Milestone::Junior1),
            "2021-10-03".to_string(),
        );

        must(roster.update_general("100", &fields));
        assert_eq!(writes.get(), 2);
        let record = roster.record_by_code("100");
        assert_eq!(record.map(|r| r.last_name.as_str()), Some("Bianchi"));
        assert_eq!(
            record.and_then(current_milestone),
            Some(Milestone::Junior1)
        );
    }

    #[test]
    fn renaming_code_onto_another_record_is_a_duplicate() {
        let mut roster = roster_with(&[fixture_record("100"), fixture_record("200")]);
        let mut fields = BTreeMap::new();
        fields.insert(Field::CensusCode, "200".to_string());
        assert_eq!(
            roster.update_general("100", &fields),
            Err(RosterError::DuplicateKey("200".to_string()))
        );
    }

    #[test]
    fn keeping_the_same_code_while_changing_fields_is_allowed() {
        let mut roster = roster_with(&[fixture_record("100"), fixture_record("200")]);
        let mut fields = BTreeMap::new();
        fields.insert(Field::CensusCode, "100".to_string());
        fields.insert(Field::Unit, "Eagles".to_string());
        must(roster.update_general("100", &fields));
        assert_eq!(
            roster.record_by_code("100").map(|r| r.unit.as_str()),
            Some("Eagles")
        );
    }

    #[test]
    fn update_unknown_key_is_not_found() {
        let mut roster = roster_with(&[]);
        let mut fields = BTreeMap::new();
        fields.insert(Field::Unit, "Eagles".to_string());
        assert_eq!(
            roster.update_general("999", &fields),
            Err(RosterError::NotFound("999".to_string()))
        );
    }

    #[test]
    fn badge_slot_update_then_clear_frees_the_slot() {
        let mut roster = roster_with(&[fixture_record("100")]);
        let slot = must_slot(1);

        must(roster.update_badge_slot(
            "100",
            slot,
            "Cook",
            "camp kitchen",
            Some(BadgeCategory::Junior),
        ));
        assert_eq!(must(roster.first_free_slot("100")), Some(must_slot(2)));
        let record = must_record(&roster, "100");
        assert_eq!(visible_badges(&record, None), vec!["Cook".to_string()]);

        must(roster.clear_badge_slot("100", slot));
        assert_eq!(must(roster.first_free_slot("100")), Some(must_slot(1)));
        let record = must_record(&roster, "100");
        assert!(visible_badges(&record, None).is_empty());
        assert!(must(roster.badges_for("100")).is_empty());
    }

    #[test]
    fn first_free_slot_is_none_when_all_fifteen_are_occupied() {
        let mut record = fixture_record("100");
        for badge in &mut record.badges {
            badge.name = "Cook".to_string();
        }
        let roster = roster_with(&[record]);
        assert_eq!(must(roster.first_free_slot("100")), None);
    }

    #[test]
    fn first_free_slot_for_unknown_key_is_not_found() {
        let roster = roster_with(&[]);
        assert_eq!(
            roster.first_free_slot("999"),
            Err(RosterError::NotFound("999".to_string()))
        );
    }

    #[test]
    fn badges_for_returns_occupied_slots_in_order() {
        let mut record = fixture_record("100");
        record.badges[4] = BadgeSlot {
            name: "Guide".to_string(),
            description: String::new(),
            category: None,
        };
        record.badges[1] = BadgeSlot {
            name: "Cook".to_string(),
            description: String::new(),
            category: Some(BadgeCategory::Junior),
        };
        let roster = roster_with(&[record]);

        let badges = must(roster.badges_for("100"));
        let numbers: Vec<usize> = badges.iter().map(|(slot, _)| slot.number()).collect();
        assert_eq!(numbers, vec![2, 5]);
    }

    #[test]
    fn search_filters_are_case_insensitive_and_combined() {
        let mut first = fixture_record("100");
        first.first_name = "Ada".to_string();
        first.last_name = "Rossi".to_string();
        let mut second = fixture_record("200");
        second.first_name = "Marco".to_string();
        second.last_name = "Rossini".to_string();
        let roster = roster_with(&[first, second]);

        assert_eq!(roster.search("", "").len(), 2);
        assert_eq!(roster.search("ADA", "").len(), 1);
        assert_eq!(roster.search("", "rossi").len(), 2);
        assert_eq!(roster.search("marco", "rossini").len(), 1);
        assert!(roster.search("ada", "rossini").is_empty());
    }

    #[test]
    fn failed_store_write_leaves_the_cache_untouched() {
        let mut roster = roster_with(&[fixture_record("100")]);
        roster.store.fail_writes = true;

        let result = roster.add(&fixture_record("200"));
        assert_eq!(
            result,
            Err(RosterError::BackingStore("write refused".to_string()))
        );
        assert_eq!(roster.records().len(), 1);

        let mut fields = BTreeMap::new();
        fields.insert(Field::Unit, "Eagles".to_string());
        let result = roster.update_general("100", &fields);
        assert_eq!(
            result,
            Err(RosterError::BackingStore("write refused".to_string()))
        );
        assert_eq!(
            roster.record_by_code("100").map(|r| r.unit.as_str()),
            Some("Wolves")
        );
    }

    #[test]
    fn slot_numbers_outside_range_are_rejected() {
        assert!(Slot::new(0).is_err());
        assert!(Slot::new(16).is_err());
        assert_eq!(must_slot(15).number(), 15);
    }

    #[test]
    fn column_headers_cover_the_full_schema() {
        let headers = column_headers();
        assert_eq!(headers.len(), COLUMN_COUNT);
        assert_eq!(headers[2], "Census Code");
        assert_eq!(headers[IDENTITY_COLUMN_COUNT], "Junior Stage 1");
        assert_eq!(headers[must_slot(1).name_column()], "Badge 1 Name");
        assert_eq!(headers[must_slot(15).category_column()], "Badge 15 Category");
    }
}
