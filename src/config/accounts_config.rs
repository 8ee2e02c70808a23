use crate::domain::errors::ConfigError;
use crate::domain::types::AccountId;
use serde::Deserialize;
use std::path::Path;

/// One monitored account as declared in the accounts YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub account_id: AccountId,
    pub username: String,
    pub api_key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub nickname: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct AccountsFile {
    accounts: Vec<AccountConfig>,
}

/// Loads and validates the accounts file.
///
/// Credentials may reference environment variables as `${VAR}`; resolution
/// happens here so the rest of the daemon only ever sees concrete values.
/// The file must not be readable by other users.
pub fn load_accounts(path: &Path) -> Result<Vec<AccountConfig>, ConfigError> {
    check_permissions(path)?;

    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::UnreadableFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let file: AccountsFile =
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::UnreadableFile {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

    let mut accounts = file.accounts;
    let mut seen = std::collections::HashSet::new();
    for account in &mut accounts {
        if account.account_id <= 0 {
            return Err(ConfigError::InvalidAccountField {
                account_id: account.account_id,
                field: "account_id",
                detail: "must be a positive integer".to_string(),
            });
        }
        if !seen.insert(account.account_id) {
            return Err(ConfigError::DuplicateAccount {
                account_id: account.account_id,
            });
        }

        account.username = resolve_env(&account.username, account.account_id, "username")?;
        account.api_key = resolve_env(&account.api_key, account.account_id, "api_key")?;

        if account.username.is_empty() {
            return Err(ConfigError::InvalidAccountField {
                account_id: account.account_id,
                field: "username",
                detail: "must not be empty".to_string(),
            });
        }
        if account.api_key.is_empty() {
            return Err(ConfigError::InvalidAccountField {
                account_id: account.account_id,
                field: "api_key",
                detail: "must not be empty".to_string(),
            });
        }
    }

    Ok(accounts)
}

/// Expands a `${VAR}` reference to the variable's value; literal values pass
/// through untouched.
fn resolve_env(
    value: &str,
    account_id: AccountId,
    field: &'static str,
) -> Result<String, ConfigError> {
    let Some(name) = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Ok(value.to_string());
    };
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar {
        name: name.to_string(),
        context: format!("account {} field `{}`", account_id, field),
    })
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|e| ConfigError::UnreadableFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let mode = meta.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(ConfigError::UnreadableFile {
            path: path.display().to_string(),
            detail: format!(
                "permissions {:o} allow access by other users; chmod 600 required",
                mode & 0o777
            ),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_secure(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .unwrap();
        }
        file
    }

    #[test]
    fn loads_plain_accounts() {
        let file = write_secure(
            r#"
accounts:
  - account_id: 101
    username: trader_one
    api_key: key-abc
  - account_id: 102
    username: trader_two
    api_key: key-def
    enabled: false
    nickname: eval
"#,
        );
        let accounts = load_accounts(file.path()).unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(accounts[0].enabled);
        assert!(!accounts[1].enabled);
        assert_eq!(accounts[1].nickname.as_deref(), Some("eval"));
    }

    #[test]
    fn resolves_env_references() {
        // Serialized via the test-runner's process env; uses a unique name.
        unsafe { std::env::set_var("RISKGUARD_TEST_KEY_101", "resolved-key") };
        let file = write_secure(
            r#"
accounts:
  - account_id: 101
    username: trader_one
    api_key: ${RISKGUARD_TEST_KEY_101}
"#,
        );
        let accounts = load_accounts(file.path()).unwrap();
        assert_eq!(accounts[0].api_key, "resolved-key");
    }

    #[test]
    fn missing_env_reference_is_an_error() {
        let file = write_secure(
            r#"
accounts:
  - account_id: 101
    username: trader_one
    api_key: ${RISKGUARD_TEST_KEY_UNSET}
"#,
        );
        let err = load_accounts(file.path()).unwrap_err();
        assert!(err.to_string().contains("RISKGUARD_TEST_KEY_UNSET"));
        assert!(err.to_string().contains("101"));
    }

    #[test]
    fn duplicate_account_rejected() {
        let file = write_secure(
            r#"
accounts:
  - {account_id: 101, username: a, api_key: k}
  - {account_id: 101, username: b, api_key: k}
"#,
        );
        assert!(matches!(
            load_accounts(file.path()),
            Err(ConfigError::DuplicateAccount { account_id: 101 })
        ));
    }

    #[test]
    fn non_positive_account_id_rejected() {
        let file = write_secure(
            r#"
accounts:
  - {account_id: 0, username: a, api_key: k}
"#,
        );
        let err = load_accounts(file.path()).unwrap_err();
        assert!(err.to_string().contains("account_id"));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_file_rejected() {
        use std::os::unix::fs::PermissionsExt;
        let file = write_secure("accounts: []");
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = load_accounts(file.path()).unwrap_err();
        assert!(err.to_string().contains("chmod"));
    }
}
