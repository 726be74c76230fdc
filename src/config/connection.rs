use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CalcError, Result};

fn default_port() -> u16 {
    5432
}

/// Parameters of one database connection, as stored in `ConfigDB.json`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection name (`output`, `coefficient`), filled from the file's key
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "DataBaseName", default)]
    pub database: String,
    #[serde(rename = "HostName", default)]
    pub host: String,
    #[serde(rename = "UserName", default)]
    pub user: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,
}

impl ConnectionInfo {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("DataBaseName", &self.database),
            ("HostName", &self.host),
            ("UserName", &self.user),
            ("Password", &self.password),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                return Err(CalcError::ConnectionConfig {
                    connection: self.id.clone(),
                    reason: format!("\"{}\" is missing or empty", name),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .field("port", &self.port)
            .finish()
    }
}

/// All connections declared in the connection file, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    connections: HashMap<String, ConnectionInfo>,
}

impl ConnectionSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CalcError::ConnectionConfig {
            connection: path.display().to_string(),
            reason: format!("cannot read connection file: {}", e),
        })?;
        Self::from_json(&text).map_err(|e| match e {
            CalcError::ConnectionConfig { reason, .. } => CalcError::ConnectionConfig {
                connection: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let connections: HashMap<String, ConnectionInfo> =
            serde_json::from_str(text).map_err(|e| CalcError::ConnectionConfig {
                connection: String::new(),
                reason: format!("invalid connection file: {}", e),
            })?;

        let connections = connections
            .into_iter()
            .map(|(id, mut info)| {
                info.id = id.clone();
                (id, info)
            })
            .collect();
        Ok(Self { connections })
    }

    pub fn insert(&mut self, id: impl Into<String>, mut info: ConnectionInfo) {
        info.id = id.into();
        self.connections.insert(info.id.clone(), info);
    }

    /// The named connection, validated
    pub fn get(&self, id: &str) -> Result<ConnectionInfo> {
        let info = self
            .connections
            .get(id)
            .ok_or_else(|| CalcError::ConnectionConfig {
                connection: id.to_string(),
                reason: "no such entry in the connection file".to_string(),
            })?;
        info.validate()?;
        Ok(info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"{
        "output": {"DataBaseName": "calc", "HostName": "localhost", "UserName": "calc", "Password": "secret"},
        "coefficient": {"DataBaseName": "coef", "HostName": "db", "UserName": "calc", "Password": "secret", "Port": 6432},
        "broken": {"DataBaseName": "calc", "HostName": "", "UserName": "calc", "Password": "secret"}
    }"#;

    #[test]
    fn test_port_defaults_to_5432() {
        let settings = ConnectionSettings::from_json(FILE).unwrap();
        let output = settings.get("output").unwrap();
        assert_eq!(output.id, "output");
        assert_eq!(output.port, 5432);
        assert_eq!(settings.get("coefficient").unwrap().port, 6432);
    }

    #[test]
    fn test_empty_field_is_rejected() {
        let settings = ConnectionSettings::from_json(FILE).unwrap();
        let err = settings.get("broken").unwrap_err();
        assert!(err.to_string().contains("HostName"));
        assert!(settings.get("missing").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let settings = ConnectionSettings::from_json(FILE).unwrap();
        let printed = format!("{:?}", settings.get("output").unwrap());
        assert!(!printed.contains("secret"));
    }
}
