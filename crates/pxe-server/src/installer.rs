//! Installer defaults shared by every rendered template.
//!
//! Loaded once at startup from an operator-maintained YAML file and exposed to
//! templates as `templates`. Passwords are stored pre-hashed (crypt(3) SHA-512,
//! e.g. `openssl passwd -6`); nothing here hashes plaintext.

use crate::error::{PxeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// On-disk installer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub locale: String,
    pub timezone: String,
    pub keyboard_layout: String,
    pub keyboard_variant: String,
    pub packages: Vec<String>,
    pub mirror: String,
    pub root_password_hash: String,
    pub disable_root: bool,
    pub given_user: InstallerUser,
    pub managed_user: InstallerUser,
    pub scripting_file_paths: ScriptPaths,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerUser {
    pub username: String,
    pub password_hash: String,
    pub ssh_authorized_keys: Vec<String>,
    pub allow_sudo: bool,
}

/// Script files, relative to the configuration file's directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptPaths {
    pub global_pre_script_file: Option<PathBuf>,
    pub global_post_script_file: Option<PathBuf>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            locale: "en_US".to_string(),
            timezone: "UTC".to_string(),
            keyboard_layout: "us".to_string(),
            keyboard_variant: String::new(),
            packages: vec!["openssh-server".to_string()],
            mirror: String::new(),
            root_password_hash: String::new(),
            disable_root: true,
            given_user: InstallerUser {
                username: "ubuntu".to_string(),
                allow_sudo: true,
                ..InstallerUser::default()
            },
            managed_user: InstallerUser {
                username: "opnadmin".to_string(),
                allow_sudo: true,
                ..InstallerUser::default()
            },
            scripting_file_paths: ScriptPaths::default(),
        }
    }
}

fn fill_blank(value: &mut String, fallback: &str) {
    if value.trim().is_empty() {
        *value = fallback.to_string();
    }
}

impl InstallerConfig {
    /// Read the configuration at `path`.
    ///
    /// A missing file is replaced by a generated default and reported as a
    /// configuration error so the operator fills it in before booting machines.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::write_default(path)?;
                warn!(path = %path.display(), "Generated default installer configuration");
                return Err(PxeError::Configuration(format!(
                    "installer configuration not found, generated template at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut config: InstallerConfig = if raw.trim().is_empty() {
            InstallerConfig::default()
        } else {
            serde_yaml::from_str(&raw)?
        };
        config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(&InstallerConfig::default())?)?;
        Ok(())
    }

    fn fill_defaults(&mut self) {
        fill_blank(&mut self.locale, "en_US");
        fill_blank(&mut self.timezone, "UTC");
        fill_blank(&mut self.keyboard_layout, "us");
        if self.packages.is_empty() {
            self.packages = vec!["openssh-server".to_string()];
        }
        fill_blank(&mut self.given_user.username, "ubuntu");
        fill_blank(&mut self.managed_user.username, "opnadmin");
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("given_user.username", &self.given_user.username),
            ("managed_user.username", &self.managed_user.username),
            ("locale", &self.locale),
            ("timezone", &self.timezone),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PxeError::Configuration(format!(
                    "installer configuration: {field} is required"
                )));
            }
        }
        Ok(())
    }
}

/// Values every template can read, grouped by installer family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateDefaults {
    pub common: CommonDefaults,
    pub autoinstall: AutoinstallDefaults,
    pub kickstart: KickstartDefaults,
    pub given_user: TemplateUser,
    pub managed_user: TemplateUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommonDefaults {
    pub timezone: String,
    pub locale: String,
    pub keyboard_layout: String,
    pub keyboard_variant: String,
    pub packages: Vec<String>,
    pub mirror: String,
    pub ssh_authorized_keys: Vec<String>,
}

/// Subiquity autoinstall
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoinstallDefaults {
    pub admin_username: String,
    pub admin_password_hash: String,
    pub disable_root: bool,
    pub pre_script: String,
    pub post_script: String,
    pub early_commands: Vec<String>,
    pub late_commands: Vec<String>,
}

/// Anaconda kickstart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KickstartDefaults {
    pub root_password_hash: String,
    pub user_name: String,
    pub user_password_hash: String,
    pub ssh_authorized_keys: Vec<String>,
    pub pre_script: String,
    pub post_script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateUser {
    pub username: String,
    pub password_hash: String,
    pub ssh_authorized_keys: Vec<String>,
    pub allow_sudo: bool,
}

impl From<&InstallerUser> for TemplateUser {
    fn from(user: &InstallerUser) -> Self {
        Self {
            username: user.username.clone(),
            password_hash: user.password_hash.trim().to_string(),
            ssh_authorized_keys: user.ssh_authorized_keys.clone(),
            allow_sudo: user.allow_sudo,
        }
    }
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        Self {
            common: CommonDefaults {
                timezone: "UTC".to_string(),
                locale: "en_US".to_string(),
                keyboard_layout: "us".to_string(),
                ..CommonDefaults::default()
            },
            autoinstall: AutoinstallDefaults {
                admin_username: "ubuntu".to_string(),
                ..AutoinstallDefaults::default()
            },
            kickstart: KickstartDefaults {
                user_name: "admin".to_string(),
                ..KickstartDefaults::default()
            },
            given_user: TemplateUser {
                username: "ubuntu".to_string(),
                ..TemplateUser::default()
            },
            managed_user: TemplateUser {
                username: "opnadmin".to_string(),
                ..TemplateUser::default()
            },
        }
    }
}

/// Read a script, resolving relative paths against `base_dir`.
fn load_script(base_dir: Option<&Path>, script: Option<&Path>) -> Result<String> {
    let Some(script) = script.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(String::new());
    };
    let full = match base_dir {
        Some(dir) if script.is_relative() => dir.join(script),
        _ => script.to_path_buf(),
    };
    let contents = std::fs::read_to_string(&full).map_err(|e| {
        PxeError::Configuration(format!("cannot read script {}: {e}", full.display()))
    })?;
    Ok(contents.trim().to_string())
}

impl TemplateDefaults {
    /// Load from an installer configuration file, or built-in defaults when
    /// no path is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(Self::default());
        };
        let config = InstallerConfig::load(path)?;
        let defaults = Self::from_installer(&config, path.parent())?;
        info!(path = %path.display(), "Loaded installer defaults");
        Ok(defaults)
    }

    /// Build from a parsed installer configuration.
    pub fn from_installer(config: &InstallerConfig, base_dir: Option<&Path>) -> Result<Self> {
        let scripts = &config.scripting_file_paths;
        let pre_script = load_script(base_dir, scripts.global_pre_script_file.as_deref())?;
        let post_script = load_script(base_dir, scripts.global_post_script_file.as_deref())?;

        let given_user = TemplateUser::from(&config.given_user);
        let managed_user = TemplateUser::from(&config.managed_user);

        Ok(Self {
            common: CommonDefaults {
                timezone: config.timezone.clone(),
                locale: config.locale.clone(),
                keyboard_layout: config.keyboard_layout.clone(),
                keyboard_variant: config.keyboard_variant.clone(),
                packages: config.packages.clone(),
                mirror: config.mirror.clone(),
                ssh_authorized_keys: given_user.ssh_authorized_keys.clone(),
            },
            autoinstall: AutoinstallDefaults {
                admin_username: given_user.username.clone(),
                admin_password_hash: given_user.password_hash.clone(),
                disable_root: config.disable_root,
                pre_script: pre_script.clone(),
                post_script: post_script.clone(),
                early_commands: Vec::new(),
                late_commands: Vec::new(),
            },
            kickstart: KickstartDefaults {
                root_password_hash: config.root_password_hash.trim().to_string(),
                user_name: managed_user.username.clone(),
                user_password_hash: managed_user.password_hash.clone(),
                ssh_authorized_keys: managed_user.ssh_authorized_keys.clone(),
                pre_script,
                post_script,
            },
            given_user,
            managed_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_path_uses_builtin_defaults() {
        let defaults = TemplateDefaults::load(None).unwrap();
        assert_eq!(defaults.common.timezone, "UTC");
        assert_eq!(defaults.kickstart.user_name, "admin");
        assert_eq!(defaults.managed_user.username, "opnadmin");
    }

    #[test]
    fn test_missing_file_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/installer.yaml");

        let err = TemplateDefaults::load(Some(&path)).unwrap_err();
        assert!(matches!(err, PxeError::Configuration(_)));
        assert!(path.exists());

        // The generated file loads cleanly on the next start
        let defaults = TemplateDefaults::load(Some(&path)).unwrap();
        assert_eq!(defaults.given_user.username, "ubuntu");
        assert_eq!(defaults.common.packages, vec!["openssh-server"]);
        assert!(defaults.autoinstall.disable_root);
    }

    #[test]
    fn test_groups_and_relative_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pre.sh"), "\necho pre\n").unwrap();
        std::fs::write(dir.path().join("post.sh"), "echo post").unwrap();
        let path = dir.path().join("installer.yaml");
        std::fs::write(
            &path,
            r#"
timezone: Europe/Berlin
keyboard_layout: ""
packages: []
root_password_hash: "$6$root"
given_user:
  username: alice
  password_hash: "$6$alice"
  ssh_authorized_keys: ["ssh-ed25519 AAAA alice"]
managed_user:
  username: ops
  password_hash: "$6$ops"
scripting_file_paths:
  global_pre_script_file: pre.sh
  global_post_script_file: post.sh
"#,
        )
        .unwrap();

        let defaults = TemplateDefaults::load(Some(&path)).unwrap();
        assert_eq!(defaults.common.timezone, "Europe/Berlin");
        assert_eq!(defaults.common.keyboard_layout, "us");
        assert_eq!(defaults.common.packages, vec!["openssh-server"]);
        assert_eq!(defaults.common.ssh_authorized_keys, vec!["ssh-ed25519 AAAA alice"]);
        assert_eq!(defaults.autoinstall.admin_username, "alice");
        assert_eq!(defaults.autoinstall.admin_password_hash, "$6$alice");
        assert_eq!(defaults.autoinstall.pre_script, "echo pre");
        assert_eq!(defaults.kickstart.root_password_hash, "$6$root");
        assert_eq!(defaults.kickstart.user_name, "ops");
        assert_eq!(defaults.kickstart.post_script, "echo post");
    }

    #[test]
    fn test_missing_script_is_error() {
        let config = InstallerConfig {
            scripting_file_paths: ScriptPaths {
                global_pre_script_file: Some(PathBuf::from("absent.sh")),
                global_post_script_file: None,
            },
            ..InstallerConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        assert!(TemplateDefaults::from_installer(&config, Some(dir.path())).is_err());
    }

    #[test]
    fn test_validate_rejects_blank_required_fields() {
        let config = InstallerConfig {
            timezone: " ".to_string(),
            ..InstallerConfig::default()
        };
        assert!(matches!(config.validate(), Err(PxeError::Configuration(_))));
    }
}
