use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "plant-doctor",
    version,
    about = "Plant leaf disease classification with per-user history"
)]
pub struct Cli {
    /// JSON config file; PLANT_DOCTOR_* environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify one or more leaf images.
    Diagnose(DiagnoseArgs),
    /// Recorded diagnoses for a user, newest first.
    History(HistoryArgs),
    /// Every catalog entry ordered by short name.
    Diseases,
    /// One catalog entry by id.
    Disease { id: i64 },
    /// One catalog entry by short name, ignoring case.
    Search { name: String },
    /// Upsert catalog entries from a JSON array.
    ImportCatalog { file: PathBuf },
    AddUser(AddUserArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DiagnoseArgs {
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Record the results for this user. Omit for an anonymous diagnosis.
    #[arg(long)]
    pub user_id: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(long)]
    pub user_id: i64,

    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct AddUserArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub email: String,
}
