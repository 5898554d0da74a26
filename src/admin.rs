use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use serde_json::Value as JSValue;
use snafu::{prelude::*, Snafu};

use club_elections::*;

use crate::admin::config_reader::*;
use crate::args::{Args, Command};

pub mod config_reader;

#[derive(Debug, Snafu)]
pub enum AdminError {
    #[snafu(display("Error opening configuration file {path}"))]
    OpeningConfig {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing configuration file {path}: {source}"))]
    ParsingConfig {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Invalid date {value:?}, expected RFC 3339 such as 2024-03-01T09:00:00Z"))]
    ParsingDate {
        source: chrono::ParseError,
        value: String,
    },
    #[snafu(display("Invalid {what} {value:?}: {message}"))]
    ParsingStatus {
        what: &'static str,
        value: String,
        message: String,
    },
    #[snafu(display("User {actor} does not hold the {permission} permission"))]
    Unauthorized { actor: UserId, permission: Permission },
    #[snafu(display("Error rendering the output"))]
    Rendering { source: serde_json::Error },

    #[snafu(context(false), display("{source}"))]
    Election { source: ElectionError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

impl AdminError {
    /// Process exit code, one per kind of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AdminError::Election { source } => match source.kind() {
                ErrorKind::Validation => 2,
                ErrorKind::Conflict => 3,
                ErrorKind::NotFound => 4,
                ErrorKind::Storage => 5,
            },
            AdminError::Unauthorized { .. } => 6,
            AdminError::ParsingDate { .. } | AdminError::ParsingStatus { .. } => 2,
            _ => 1,
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;

/// Opens the database named by the arguments and configuration, then runs
/// the command and prints its result.
pub fn run(args: &Args) -> AdminResult<()> {
    let config = match &args.config {
        Some(path) => read_config(path)?,
        None => AdminConfig::default(),
    };
    let rules = validate_rules(&config)?;
    let authz = ConfigAuthorizer::from_config(&config)?;

    let path = config.database_path(&args.database);
    let store = match config.busy_timeout() {
        Some(timeout) => Store::open_with_timeout(&path, timeout)?,
        None => Store::open(&path)?,
    };
    let elections = ElectionsBuilder::new(&rules).build(store);

    let output = execute(&elections, &authz, args.actor, &args.command)?;
    let pretty = serde_json::to_string_pretty(&output).context(RenderingSnafu {})?;
    println!("{}", pretty);
    Ok(())
}

fn require(authz: &dyn Authorizer, actor: UserId, permission: Permission) -> AdminResult<()> {
    ensure!(
        authz.can(actor, permission),
        UnauthorizedSnafu { actor, permission }
    );
    Ok(())
}

/// The permission a command needs, if any. Reads are open to everyone.
fn permission_for(command: &Command) -> Option<Permission> {
    match command {
        Command::ClubCreate { .. } | Command::ClubStatus { .. } | Command::PositionsReplace { .. } => {
            Some(Permission::ManageClubs)
        }
        Command::MemberStatus { .. } | Command::Assign { .. } => Some(Permission::ManageMembers),
        Command::NominationOpen { .. }
        | Command::NominationActivate { .. }
        | Command::NominationClose { .. }
        | Command::NominationArchive { .. }
        | Command::NominationDelete { .. }
        | Command::ApplicationApprove { .. }
        | Command::ApplicationReject { .. } => Some(Permission::ManageNominations),
        Command::EventCreate { .. }
        | Command::EventUpdate { .. }
        | Command::EventActivate { .. }
        | Command::EventClose { .. }
        | Command::EventArchive { .. }
        | Command::EventDelete { .. }
        | Command::Recompute { .. } => Some(Permission::ManageVotingEvents),
        Command::Apply { .. } => Some(Permission::Apply),
        Command::Vote { .. } => Some(Permission::Vote),
        Command::Clubs
        | Command::Positions { .. }
        | Command::Holders { .. }
        | Command::Join { .. }
        | Command::Members { .. }
        | Command::Nominations { .. }
        | Command::Applications { .. }
        | Command::Events { .. }
        | Command::Votes { .. }
        | Command::Tally { .. }
        | Command::Winners { .. }
        | Command::Deadlines { .. } => None,
    }
}

fn parse_date(value: &str) -> AdminResult<DateTime<Utc>> {
    let d = DateTime::parse_from_rfc3339(value.trim()).context(ParsingDateSnafu { value })?;
    Ok(d.with_timezone(&Utc))
}

fn parse_days(days: i64) -> AdminResult<Duration> {
    Duration::try_days(days).context(ParsingStatusSnafu {
        what: "number of days",
        value: days.to_string(),
        message: "out of range".to_string(),
    })
}

fn parse_window(start: &str, end: &str) -> AdminResult<Window> {
    Ok(Window::new(parse_date(start)?, parse_date(end)?)?)
}

fn parse_status<T: std::str::FromStr<Err = String>>(
    what: &'static str,
    value: &str,
) -> AdminResult<T> {
    value.parse::<T>().map_err(|message| AdminError::ParsingStatus {
        what,
        value: value.to_string(),
        message,
    })
}

fn to_js<T: Serialize>(x: &T) -> AdminResult<JSValue> {
    serde_json::to_value(x).context(RenderingSnafu {})
}

/// Runs one command on behalf of `actor` and returns its result as JSON.
pub fn execute(
    elections: &Elections,
    authz: &dyn Authorizer,
    actor: UserId,
    command: &Command,
) -> AdminResult<JSValue> {
    if let Some(permission) = permission_for(command) {
        require(authz, actor, permission)?;
    }
    debug!("execute: actor {} command {:?}", actor, command);

    let res = match command {
        Command::ClubCreate {
            name,
            join_fee,
            status,
            positions,
        } => to_js(&elections.create_club(
            actor,
            &NewClub {
                name: name.clone(),
                status: parse_status("club status", status)?,
                join_fee: *join_fee,
                positions: positions.iter().map(|p| NewPosition::named(p)).collect(),
            },
        )?)?,
        Command::ClubStatus { club, status } => to_js(&elections.set_club_status(
            actor,
            *club,
            parse_status("club status", status)?,
        )?)?,
        Command::Clubs => to_js(&elections.clubs()?)?,

        Command::Positions { club } => to_js(&elections.positions(*club)?)?,
        Command::PositionsReplace {
            club,
            positions,
            inactive,
        } => {
            let mut list: Vec<NewPosition> =
                positions.iter().map(|p| NewPosition::named(p)).collect();
            list.extend(inactive.iter().map(|p| NewPosition {
                is_active: false,
                ..NewPosition::named(p)
            }));
            to_js(&elections.replace_positions(actor, *club, &list)?)?
        }
        Command::Holders { club } => to_js(&elections.current_holders(*club)?)?,

        Command::Join { club } => to_js(&elections.join_club(*club, actor)?)?,
        Command::MemberStatus { club, user, status } => to_js(&elections.set_membership_status(
            actor,
            *club,
            *user,
            parse_status("membership status", status)?,
        )?)?,
        Command::Assign {
            club,
            user,
            position,
        } => to_js(&elections.assign_position(actor, *club, *user, *position)?)?,
        Command::Members { club } => to_js(&elections.members(*club)?)?,

        Command::NominationOpen {
            club,
            title,
            start,
            end,
            draft,
        } => {
            let window = parse_window(start, end)?;
            if *draft {
                to_js(&elections.draft_nomination(actor, *club, title, window)?)?
            } else {
                to_js(&elections.open_nomination(actor, *club, title, window)?)?
            }
        }
        Command::NominationActivate { id } => to_js(&elections.activate_nomination(actor, *id)?)?,
        Command::NominationClose { id } => to_js(&elections.close_nomination(actor, *id)?)?,
        Command::NominationArchive { id } => to_js(&elections.archive_nomination(actor, *id)?)?,
        Command::NominationDelete { id } => {
            elections.delete_nomination(actor, *id)?;
            json!({ "deleted": id })
        }
        Command::Nominations { club } => to_js(&elections.nominations(*club)?)?,

        Command::Apply {
            nomination,
            position,
        } => to_js(&elections.apply(*nomination, actor, *position)?)?,
        Command::ApplicationApprove { id } => to_js(&elections.approve_application(actor, *id)?)?,
        Command::ApplicationReject { id } => to_js(&elections.reject_application(actor, *id)?)?,
        Command::Applications {
            nomination,
            approved,
        } => {
            if *approved {
                to_js(&elections.candidates(*nomination)?)?
            } else {
                to_js(&elections.applications(*nomination)?)?
            }
        }

        Command::EventCreate {
            club,
            title,
            start,
            end,
            active,
        } => {
            let status = if *active {
                EventStatus::Active
            } else {
                EventStatus::Draft
            };
            let window = parse_window(start, end)?;
            to_js(&elections.create_voting_event(actor, *club, title, window, status)?)?
        }
        Command::EventUpdate {
            id,
            club,
            title,
            start,
            end,
        } => {
            let window = match (start, end) {
                (Some(s), Some(e)) => Some(parse_window(s, e)?),
                (None, None) => None,
                _ => whatever!("Pass both --start and --end to change the voting period"),
            };
            let changes = VotingEventUpdate {
                club_id: *club,
                title: title.clone(),
                window,
            };
            to_js(&elections.update_voting_event(actor, *id, &changes)?)?
        }
        Command::EventActivate { id } => to_js(&elections.activate_voting_event(actor, *id)?)?,
        Command::EventClose { id } => {
            let (event, winners) = elections.close_voting_event(actor, *id)?;
            json!({ "event": to_js(&event)?, "winners": to_js(&winners)? })
        }
        Command::EventArchive { id } => to_js(&elections.archive_voting_event(actor, *id)?)?,
        Command::EventDelete { id } => {
            elections.delete_voting_event(actor, *id)?;
            json!({ "deleted": id })
        }
        Command::Events { club } => to_js(&elections.voting_events(*club)?)?,

        Command::Vote { event, candidate } => {
            to_js(&elections.cast_vote(*event, actor, *candidate)?)?
        }
        Command::Votes { event } => to_js(&elections.votes(*event)?)?,
        Command::Tally { event, position } => to_js(&elections.tally(*event, *position)?)?,
        Command::Winners { event } => to_js(&elections.winners(*event)?)?,
        Command::Recompute { event } => to_js(&elections.recompute_winners(actor, *event)?)?,
        Command::Deadlines { days } => {
            to_js(&elections.upcoming_deadlines(parse_days(*days)?)?)?
        }
    };
    info!("Command completed for actor {}", actor);
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Everyone;

    impl Authorizer for Everyone {
        fn can(&self, _actor: UserId, _permission: Permission) -> bool {
            true
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn elections() -> Elections {
        init_logger();
        Elections::new(Store::in_memory().unwrap())
    }

    fn id_of(js: &JSValue) -> i64 {
        js["id"].as_i64().unwrap()
    }

    // A window around the current time, as the command line would pass it.
    fn dates() -> (String, String) {
        let now = Utc::now();
        (
            (now - Duration::hours(1)).to_rfc3339(),
            (now + Duration::days(3)).to_rfc3339(),
        )
    }

    #[test]
    fn full_cycle_through_commands() {
        let e = elections();
        let run = |actor: UserId, c: Command| execute(&e, &Everyone, actor, &c).unwrap();
        let (start, end) = dates();

        let club = run(
            0,
            Command::ClubCreate {
                name: "Chess".to_string(),
                join_fee: 0,
                status: "active".to_string(),
                positions: vec!["President".to_string()],
            },
        );
        let club_id = id_of(&club);
        let positions = run(0, Command::Positions { club: club_id });
        let president = id_of(&positions[0]);

        let nomination = run(
            0,
            Command::NominationOpen {
                club: club_id,
                title: "Spring".to_string(),
                start: start.clone(),
                end: end.clone(),
                draft: false,
            },
        );
        let application = run(
            5,
            Command::Apply {
                nomination: id_of(&nomination),
                position: president,
            },
        );
        run(0, Command::ApplicationApprove { id: id_of(&application) });
        run(0, Command::NominationClose { id: id_of(&nomination) });

        let event = run(
            0,
            Command::EventCreate {
                club: club_id,
                title: "Election".to_string(),
                start,
                end,
                active: true,
            },
        );
        run(
            0,
            Command::MemberStatus {
                club: club_id,
                user: 9,
                status: "active".to_string(),
            },
        );
        run(
            9,
            Command::Vote {
                event: id_of(&event),
                candidate: id_of(&application),
            },
        );
        let closed = run(0, Command::EventClose { id: id_of(&event) });
        assert_eq!(closed["event"]["status"], "closed");
        assert_eq!(closed["winners"][0]["user_id"], 5);

        let holders = run(0, Command::Holders { club: club_id });
        assert_eq!(holders[0]["user_id"], 5);
        assert_eq!(holders[0]["source"], "election");
    }

    #[test]
    fn commands_check_permissions() {
        let e = elections();
        let authz = ConfigAuthorizer::from_config(&AdminConfig::default()).unwrap();
        let err = execute(
            &e,
            &authz,
            3,
            &Command::ClubCreate {
                name: "Chess".to_string(),
                join_fee: 0,
                status: "active".to_string(),
                positions: vec![],
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 6);
        // Reads need no permission.
        let clubs = execute(&e, &authz, 3, &Command::Clubs).unwrap();
        assert_eq!(clubs, json!([]));
    }

    #[test]
    fn errors_map_to_exit_codes() {
        let e = elections();
        let err = execute(&e, &Everyone, 0, &Command::Holders { club: 12 }).unwrap_err();
        assert_eq!(err.exit_code(), 4);

        let err = execute(
            &e,
            &Everyone,
            0,
            &Command::NominationOpen {
                club: 1,
                title: "Spring".to_string(),
                start: "yesterday".to_string(),
                end: "tomorrow".to_string(),
                draft: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = execute(
            &e,
            &Everyone,
            0,
            &Command::ClubStatus {
                club: 1,
                status: "dormant".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn deadline_horizon_is_bounded() {
        let e = elections();
        let far = execute(&e, &Everyone, 0, &Command::Deadlines { days: 100_000_000 }).unwrap();
        assert_eq!(far, json!([]));
        let err = execute(&e, &Everyone, 0, &Command::Deadlines { days: i64::MAX }).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn event_update_needs_both_dates() {
        let e = elections();
        let err = execute(
            &e,
            &Everyone,
            0,
            &Command::EventUpdate {
                id: 1,
                club: None,
                title: None,
                start: Some("2024-03-01T09:00:00Z".to_string()),
                end: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
