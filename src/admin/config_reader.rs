use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use club_elections::*;

use crate::admin::*;

/// The operator that holds every permission when no configuration says
/// otherwise.
pub const LOCAL_OPERATOR: UserId = 0;

const DEFAULT_DATABASE_PATH: &str = "clubvote.sqlite3";

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(rename = "databasePath")]
    pub database_path: Option<String>,
    #[serde(rename = "busyTimeoutMs")]
    pub busy_timeout_ms: Option<u64>,
    #[serde(rename = "tiebreakMode")]
    pub tiebreak_mode: Option<String>,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<String>,
    pub permissions: Option<BTreeMap<String, Vec<String>>>,
}

impl AdminConfig {
    /// The database to open. The command line wins over the file.
    pub fn database_path(&self, cli: &Option<String>) -> String {
        cli.clone()
            .or_else(|| self.database_path.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string())
    }

    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }
}

pub fn read_config(path: &str) -> AdminResult<AdminConfig> {
    let contents = fs::read_to_string(path).context(OpeningConfigSnafu { path })?;
    let config: AdminConfig =
        serde_json::from_str(contents.as_str()).context(ParsingConfigSnafu { path })?;
    info!("config: {:?}", config);
    Ok(config)
}

pub fn validate_rules(config: &AdminConfig) -> AdminResult<ElectionRules> {
    let res = ElectionRules {
        tiebreak_mode: match config.tiebreak_mode.as_deref() {
            None | Some("earliestApplication") => TieBreakMode::EarliestApplication,
            Some("random") => {
                let seed = match config.random_seed.clone().map(|s| s.parse::<u32>()) {
                    Some(Ok(x)) => x,
                    x => {
                        whatever!("Cannot use tiebreak mode random with seed {:?}", x);
                    }
                };
                TieBreakMode::Random(seed)
            }
            Some(x) => {
                whatever!("Cannot use tiebreak mode {:?}: unknown mode", x);
            }
        },
    };
    debug!("validate_rules: {:?}", res);
    Ok(res)
}

/// Permissions granted per user, as listed in the configuration file.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ConfigAuthorizer {
    grants: HashMap<UserId, HashSet<Permission>>,
}

impl ConfigAuthorizer {
    pub fn from_config(config: &AdminConfig) -> AdminResult<ConfigAuthorizer> {
        let table = match &config.permissions {
            Some(t) => t,
            None => {
                return Ok(ConfigAuthorizer {
                    grants: HashMap::from([(
                        LOCAL_OPERATOR,
                        Permission::ALL.iter().copied().collect(),
                    )]),
                })
            }
        };
        let mut grants: HashMap<UserId, HashSet<Permission>> = HashMap::new();
        for (user, names) in table.iter() {
            let user_id = match user.trim().parse::<UserId>() {
                Ok(x) => x,
                Err(_) => whatever!("Permissions are keyed by user id, found {:?}", user),
            };
            let entry = grants.entry(user_id).or_default();
            for name in names.iter() {
                if name == "*" {
                    entry.extend(Permission::ALL.iter().copied());
                } else {
                    match Permission::parse(name) {
                        Some(p) => {
                            entry.insert(p);
                        }
                        None => whatever!("Unknown permission {:?} for user {}", name, user_id),
                    }
                }
            }
        }
        Ok(ConfigAuthorizer { grants })
    }
}

impl Authorizer for ConfigAuthorizer {
    fn can(&self, actor: UserId, permission: Permission) -> bool {
        self.grants
            .get(&actor)
            .map(|ps| ps.contains(&permission))
            .unwrap_or(false)
    }
}
