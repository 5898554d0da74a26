use clap::{Parser, Subcommand};

/// Administration of club elections: positions, nominations, voting events,
/// ballots and results.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The JSON configuration file. See the manual of
    /// the `club_elections` crate for its format.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (file path) The election database. Setting this option overrides the
    /// path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub database: Option<String>,

    /// (user id, default 0) The user on whose behalf the command runs.
    #[clap(short, long, value_parser, default_value_t = 0)]
    pub actor: i64,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

// Dates are RFC 3339 strings, e.g. 2024-03-01T09:00:00Z.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Creates a club with its positions.
    ClubCreate {
        #[clap(long, value_parser)]
        name: String,
        /// In minor currency units.
        #[clap(long, value_parser, default_value_t = 0)]
        join_fee: i64,
        /// active, inactive or pending
        #[clap(long, value_parser, default_value = "active")]
        status: String,
        #[clap(long = "position", value_parser)]
        positions: Vec<String>,
    },
    ClubStatus {
        #[clap(long, value_parser)]
        club: i64,
        #[clap(long, value_parser)]
        status: String,
    },
    Clubs,

    Positions {
        #[clap(long, value_parser)]
        club: i64,
    },
    /// Replaces every position of a club.
    PositionsReplace {
        #[clap(long, value_parser)]
        club: i64,
        #[clap(long = "position", value_parser)]
        positions: Vec<String>,
        /// Positions listed here are created inactive.
        #[clap(long = "inactive", value_parser)]
        inactive: Vec<String>,
    },
    /// Who currently holds each active position.
    Holders {
        #[clap(long, value_parser)]
        club: i64,
    },

    /// Asks to join a club as the acting user.
    Join {
        #[clap(long, value_parser)]
        club: i64,
    },
    MemberStatus {
        #[clap(long, value_parser)]
        club: i64,
        #[clap(long, value_parser)]
        user: i64,
        /// pending, active, inactive or banned
        #[clap(long, value_parser)]
        status: String,
    },
    /// Assigns a position outside of any election. Without --position, the
    /// assignment is cleared.
    Assign {
        #[clap(long, value_parser)]
        club: i64,
        #[clap(long, value_parser)]
        user: i64,
        #[clap(long, value_parser)]
        position: Option<i64>,
    },
    Members {
        #[clap(long, value_parser)]
        club: i64,
    },

    NominationOpen {
        #[clap(long, value_parser)]
        club: i64,
        #[clap(long, value_parser)]
        title: String,
        #[clap(long, value_parser)]
        start: String,
        #[clap(long, value_parser)]
        end: String,
        /// Creates the nomination as a draft instead of opening it.
        #[clap(long, takes_value = false)]
        draft: bool,
    },
    NominationActivate {
        #[clap(long, value_parser)]
        id: i64,
    },
    NominationClose {
        #[clap(long, value_parser)]
        id: i64,
    },
    NominationArchive {
        #[clap(long, value_parser)]
        id: i64,
    },
    NominationDelete {
        #[clap(long, value_parser)]
        id: i64,
    },
    Nominations {
        #[clap(long, value_parser)]
        club: i64,
    },

    /// Applies for a position as the acting user.
    Apply {
        #[clap(long, value_parser)]
        nomination: i64,
        #[clap(long, value_parser)]
        position: i64,
    },
    ApplicationApprove {
        #[clap(long, value_parser)]
        id: i64,
    },
    ApplicationReject {
        #[clap(long, value_parser)]
        id: i64,
    },
    Applications {
        #[clap(long, value_parser)]
        nomination: i64,
        /// Only list the approved applications.
        #[clap(long, takes_value = false)]
        approved: bool,
    },

    EventCreate {
        #[clap(long, value_parser)]
        club: i64,
        #[clap(long, value_parser)]
        title: String,
        #[clap(long, value_parser)]
        start: String,
        #[clap(long, value_parser)]
        end: String,
        /// Opens the event right away instead of creating a draft.
        #[clap(long, takes_value = false)]
        active: bool,
    },
    EventUpdate {
        #[clap(long, value_parser)]
        id: i64,
        #[clap(long, value_parser)]
        club: Option<i64>,
        #[clap(long, value_parser)]
        title: Option<String>,
        #[clap(long, value_parser)]
        start: Option<String>,
        #[clap(long, value_parser)]
        end: Option<String>,
    },
    EventActivate {
        #[clap(long, value_parser)]
        id: i64,
    },
    /// Closes a voting event and computes its winners.
    EventClose {
        #[clap(long, value_parser)]
        id: i64,
    },
    EventArchive {
        #[clap(long, value_parser)]
        id: i64,
    },
    EventDelete {
        #[clap(long, value_parser)]
        id: i64,
    },
    Events {
        #[clap(long, value_parser)]
        club: i64,
    },

    /// Votes for a candidate (an approved application) as the acting user.
    Vote {
        #[clap(long, value_parser)]
        event: i64,
        #[clap(long, value_parser)]
        candidate: i64,
    },
    Votes {
        #[clap(long, value_parser)]
        event: i64,
    },
    Tally {
        #[clap(long, value_parser)]
        event: i64,
        #[clap(long, value_parser)]
        position: i64,
    },
    Winners {
        #[clap(long, value_parser)]
        event: i64,
    },
    /// Recomputes the winners of a closed voting event.
    Recompute {
        #[clap(long, value_parser)]
        event: i64,
    },
    /// Active nominations and voting events ending soon.
    Deadlines {
        #[clap(long, value_parser, default_value_t = 7)]
        days: i64,
    },
}
