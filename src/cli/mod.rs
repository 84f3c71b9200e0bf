use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod workspace;

#[derive(Parser)]
#[command(name = "prodflow")]
#[command(about = "Step lifecycle tracker for product-development requests")]
#[command(long_about = "Prodflow drives the steps of a product-development request through their \
                       lifecycle: start, bounded hold cycles, completion with field validation, \
                       cancel and skip. By default it works on a local JSON workspace; pass --remote \
                       to talk to the configured request store instead.")]
pub struct Cli {
    /// Workspace snapshot file used when not in remote mode
    #[arg(long, global = true, default_value = "prodflow-workspace.json")]
    pub workspace: PathBuf,

    /// Use the configured HTTP request store instead of the workspace file
    #[arg(long, global = true)]
    pub remote: bool,

    /// User id the operation is performed as
    #[arg(long = "as", global = true, default_value = "system", value_name = "USER_ID")]
    pub actor: String,

    /// Act with admin privileges
    #[arg(long, global = true)]
    pub admin: bool,

    /// Emit JSON log lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Overall status of a request and its steps
    Status {
        request: String,
    },
    /// Step snapshot with hold info, legal actions and visible fields
    Show {
        request: String,
        step: String,
    },
    /// Hold-cycle counters and the next hold action of a step
    HoldInfo {
        request: String,
        step: String,
    },
    /// Lifecycle actions the acting user may perform now
    Actions {
        request: String,
        step: String,
    },
    /// Resolved select options of the step's visible fields
    Options {
        request: String,
        step: String,
    },
    /// Start a step, auto-assigning it when nobody owns it yet
    Start {
        request: String,
        step: String,
    },
    /// Put an in-progress step on hold
    Hold {
        request: String,
        step: String,
    },
    /// Resume a held step
    Continue {
        request: String,
        step: String,
    },
    /// Complete a step after validating its fields
    Complete {
        request: String,
        step: String,
        /// Field value as TAG=VALUE; VALUE is parsed as JSON, falling back to a string
        #[arg(long = "field", value_name = "TAG=VALUE")]
        fields: Vec<String>,
        /// JSON object of field values, applied before --field
        #[arg(long, value_name = "PATH")]
        fields_file: Option<PathBuf>,
    },
    /// Cancel a step
    Cancel {
        request: String,
        step: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Skip a step
    Skip {
        request: String,
        step: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Assign a step randomly among eligible users, or to --user (admin only)
    Assign {
        request: String,
        step: String,
        #[arg(long, value_name = "USER_ID")]
        user: Option<String>,
    },
    /// Record the price of a cost-bearing step (smallest currency unit)
    SetPrice {
        request: String,
        step: String,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },
}
