//! Remote target description

use std::path::PathBuf;

/// A resolved remote environment. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Environment name from the config file
    pub name: String,
    pub host: String,
    pub user: String,
    pub port: u16,

    /// Identity file passed to `ssh -i`
    pub identity: Option<PathBuf>,

    /// Remote working directory
    pub dir: String,
}

impl Target {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Remote working directory without a trailing slash
    pub fn dir(&self) -> &str {
        let trimmed = self.dir.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }

    /// Join a path relative to the remote working directory
    pub fn path(&self, rel: &str) -> String {
        let rel = rel.trim_start_matches("./").trim_start_matches('/');
        if self.dir() == "/" {
            format!("/{}", rel)
        } else {
            format!("{}/{}", self.dir(), rel)
        }
    }

    /// `user@host:path` for rsync
    pub fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.destination(), path)
    }

    /// Control socket shared by every connection of a run
    pub fn control_path(&self) -> PathBuf {
        std::env::temp_dir().join(format!("podlift-{}-{}", self.user, self.host))
    }

    /// Connection options shared by `ssh` and `rsync -e`
    pub fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPersist=5m".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
        ];
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args
    }

    /// Full `ssh` argument list up to (not including) the remote command
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = self.ssh_options();
        args.push(self.destination());
        args
    }

    /// Value for `rsync -e`
    pub fn rsync_shell(&self) -> String {
        let mut shell = vec!["ssh".to_string()];
        shell.extend(self.ssh_options());
        shell.join(" ")
    }
}
