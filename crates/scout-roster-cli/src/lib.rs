//! Roster command surface for the `scouts` binary and host runtimes.
//!
//! Hosts embed roster behavior through:
//! - [`run_cli`] for full parsed CLI execution: the sheet connection is
//!   established on a background task and awaited before the first
//!   operation.
//! - [`run_command`] for direct [`Command`] execution against an existing
//!   [`Roster`], whatever its backing store.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use scout_roster_core::{
    display_row, BadgeCategory, BadgeSlot, DisplayRow, Field, Milestone, Roster, RosterError,
    ScoutRecord, Slot, TabularStore,
};
use scout_roster_store_sqlite::spawn_connect;

#[derive(Debug, Parser)]
#[command(name = "scouts")]
#[command(about = "Scout roster records CLI")]
pub struct Cli {
    #[arg(long, default_value = "./scout_roster.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    List(ListArgs),
    Show(ShowArgs),
    Add(AddArgs),
    Update(UpdateArgs),
    Remove(RemoveArgs),
    Badge {
        #[command(subcommand)]
        command: Box<BadgeCommand>,
    },
    Search(SearchArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    code: String,
    #[arg(long, default_value = "")]
    birth_year: String,
    #[arg(long, default_value = "")]
    unit: String,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    new_code: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    birth_year: Option<String>,
    #[arg(long)]
    unit: Option<String>,
    /// Milestone assignment as `<stage>=<value>`; repeatable. An empty
    /// value clears the stage.
    #[arg(long = "milestone")]
    milestones: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[arg(long)]
    code: String,
}

#[derive(Debug, Subcommand)]
pub enum BadgeCommand {
    Set(BadgeSetArgs),
    Clear(BadgeClearArgs),
    List(BadgeListArgs),
}

#[derive(Debug, Args)]
pub struct BadgeSetArgs {
    #[arg(long)]
    code: String,
    /// Target slot 1..=15; defaults to the first free slot.
    #[arg(long)]
    slot: Option<u8>,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    category: CategoryArg,
}

#[derive(Debug, Args)]
pub struct BadgeClearArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    slot: u8,
}

#[derive(Debug, Args)]
pub struct BadgeListArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long, default_value = "")]
    surname: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CategoryArg {
    Junior,
    Senior,
}

/// Connects to the sheet named by `--db` and executes the parsed command.
///
/// # Errors
/// Returns an error when the connection cannot be established or the
/// command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let sheet = spawn_connect(cli.db).wait()?;
    let mut roster = Roster::new(sheet)?;
    run_command(cli.command, &mut roster)
}

/// Executes a parsed command against an existing roster.
///
/// Expected conditions (`NoChange` on an empty diff) are reported as normal
/// output, not failures.
///
/// # Errors
/// Returns an error when validation, lookup, or the backing store fails.
pub fn run_command<S: TabularStore>(command: Command, roster: &mut Roster<S>) -> Result<()> {
    match command {
        Command::List(args) => {
            let rows: Vec<DisplayRow> = roster.records().iter().map(display_row).collect();
            if args.json {
                let payload = build_list_json_payload(rows);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_display_table(&rows);
            }
            Ok(())
        }
        Command::Show(args) => {
            let record = roster
                .record_by_code(&args.code)
                .ok_or_else(|| anyhow!(RosterError::NotFound(args.code.trim().to_string())))?
                .clone();
            let badges = roster.badges_for(&args.code)?;
            if args.json {
                let payload = build_show_json_payload(&record, &badges);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_record(&record, &badges);
            }
            Ok(())
        }
        Command::Add(args) => {
            let record = ScoutRecord {
                first_name: args.first_name,
                last_name: args.last_name,
                census_code: args.code,
                birth_year: args.birth_year,
                unit: args.unit,
                ..ScoutRecord::default()
            };
            roster.add(&record)?;
            println!("added {}", record.census_code.trim());
            Ok(())
        }
        Command::Update(args) => {
            let mut fields = BTreeMap::new();
            if let Some(value) = args.new_code {
                let _ = fields.insert(Field::CensusCode, value);
            }
            if let Some(value) = args.first_name {
                let _ = fields.insert(Field::FirstName, value);
            }
            if let Some(value) = args.last_name {
                let _ = fields.insert(Field::LastName, value);
            }
            if let Some(value) = args.birth_year {
                let _ = fields.insert(Field::BirthYear, value);
            }
            if let Some(value) = args.unit {
                let _ = fields.insert(Field::Unit, value);
            }
            for raw in &args.milestones {
                let (stage, value) = parse_stage_assignment(raw)?;
                let _ = fields.insert(Field::Stage(stage), value);
            }
            if fields.is_empty() {
                return Err(anyhow!("provide at least one field to update"));
            }

            match roster.update_general(&args.code, &fields) {
                Ok(()) => {
                    println!("updated {}", args.code.trim());
                    Ok(())
                }
                Err(RosterError::NoChange) => {
                    println!("no changes detected for {}; nothing to do", args.code.trim());
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
        Command::Remove(args) => {
            roster.delete(&args.code)?;
            println!("removed {}", args.code.trim());
            Ok(())
        }
        Command::Badge { command } => run_badge(*command, roster),
        Command::Search(args) => {
            let rows: Vec<DisplayRow> = roster
                .search(&args.name, &args.surname)
                .into_iter()
                .map(display_row)
                .collect();
            if args.json {
                let payload = build_list_json_payload(rows);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_display_table(&rows);
            }
            Ok(())
        }
    }
}

fn run_badge<S: TabularStore>(command: BadgeCommand, roster: &mut Roster<S>) -> Result<()> {
    match command {
        BadgeCommand::Set(args) => {
            if args.name.trim().is_empty() {
                return Err(anyhow!("badge name is required"));
            }
            let slot = match args.slot {
                Some(number) => Slot::new(number)?,
                None => roster.first_free_slot(&args.code)?.ok_or_else(|| {
                    anyhow!(
                        "all 15 badge slots are occupied for {}",
                        args.code.trim()
                    )
                })?,
            };
            roster.update_badge_slot(
                &args.code,
                slot,
                &args.name,
                &args.description,
                Some(map_category(args.category)),
            )?;
            println!(
                "badge '{}' written to slot {slot} for {}",
                args.name.trim(),
                args.code.trim()
            );
            Ok(())
        }
        BadgeCommand::Clear(args) => {
            let slot = Slot::new(args.slot)?;
            roster.clear_badge_slot(&args.code, slot)?;
            println!("cleared slot {slot} for {}", args.code.trim());
            Ok(())
        }
        BadgeCommand::List(args) => {
            let badges = roster.badges_for(&args.code)?;
            if args.json {
                let entries: Vec<BadgeEntry> = badges.iter().map(badge_entry).collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_badge_table(&badges);
            }
            Ok(())
        }
    }
}

fn map_category(value: CategoryArg) -> BadgeCategory {
    match value {
        CategoryArg::Junior => BadgeCategory::Junior,
        CategoryArg::Senior => BadgeCategory::Senior,
    }
}

fn parse_stage_assignment(raw: &str) -> Result<(Milestone, String)> {
    let (stage, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("milestone must be <stage>=<value>, got '{raw}'"))?;
    let stage = Milestone::parse(stage.trim())
        .ok_or_else(|| anyhow!("unknown milestone stage '{}'", stage.trim()))?;
    Ok((stage, value.trim().to_string()))
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ListJsonPayload {
    contract_version: String,
    rows: Vec<DisplayRow>,
}

fn build_list_json_payload(rows: Vec<DisplayRow>) -> ListJsonPayload {
    ListJsonPayload {
        contract_version: "roster_list.v1".to_string(),
        rows,
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ShowJsonPayload {
    contract_version: String,
    display: DisplayRow,
    stages: Vec<StageValue>,
    badges: Vec<BadgeEntry>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct StageValue {
    stage: String,
    value: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct BadgeEntry {
    slot: usize,
    name: String,
    description: String,
    category: String,
}

fn badge_entry((slot, badge): &(Slot, BadgeSlot)) -> BadgeEntry {
    BadgeEntry {
        slot: slot.number(),
        name: badge.name.clone(),
        description: badge.description.clone(),
        category: badge
            .category
            .map_or_else(String::new, |category| category.as_str().to_string()),
    }
}

fn build_show_json_payload(
    record: &ScoutRecord,
    badges: &[(Slot, BadgeSlot)],
) -> ShowJsonPayload {
    ShowJsonPayload {
        contract_version: "roster_show.v1".to_string(),
        display: display_row(record),
        stages: Milestone::ALL
            .iter()
            .map(|stage| StageValue {
                stage: stage.as_str().to_string(),
                value: record.stage_value(*stage).to_string(),
            })
            .collect(),
        badges: badges.iter().map(badge_entry).collect(),
    }
}

fn print_display_table(rows: &[DisplayRow]) {
    println!(
        "{:<12} {:<14} {:<14} {:<6} {:<12} {:<14} badges",
        "code", "first_name", "last_name", "year", "unit", "milestone"
    );
    println!("{}", "-".repeat(100));
    for row in rows {
        println!(
            "{:<12} {:<14} {:<14} {:<6} {:<12} {:<14} {}",
            row.census_code,
            row.first_name,
            row.last_name,
            row.birth_year,
            row.unit,
            row.milestone,
            row.badges
        );
    }
}

fn print_record(record: &ScoutRecord, badges: &[(Slot, BadgeSlot)]) {
    let display = display_row(record);
    println!("code:      {}", display.census_code);
    println!("name:      {} {}", display.first_name, display.last_name);
    println!("year:      {}", display.birth_year);
    println!("unit:      {}", display.unit);
    println!("milestone: {}", display.milestone);
    println!("badges:    {}", display.badges);
    for stage in Milestone::ALL {
        let value = record.stage_value(stage);
        if !value.trim().is_empty() {
            println!("  {:<16} {}", stage.as_str(), value.trim());
        }
    }
    if !badges.is_empty() {
        print_badge_table(badges);
    }
}

fn print_badge_table(badges: &[(Slot, BadgeSlot)]) {
    println!("{:<5} {:<9} {:<20} description", "slot", "category", "name");
    println!("{}", "-".repeat(70));
    for (slot, badge) in badges {
        println!(
            "{:<5} {:<9} {:<20} {}",
            slot.number(),
            badge
                .category
                .map_or("", BadgeCategory::as_str),
            badge.name,
            badge.description
        );
    }
}
