//! `podlift init`: starter config file

use std::path::Path;

use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;

const TEMPLATE: &str = r#"app_name: "__APP__"
binary_name: "__BINARY__"

build:
  arch: "amd64"
  # Placeholders: {{.Version}} {{.Commit}} {{.Date}} {{.Tag}} {{.MainVersion}} {{.GoVersion}}
  ldflags: "-s -w -X 'main.Version={{.Version}}' -X 'main.Commit={{.Commit}}'"
  # cmd: "make release"   # receives LDFLAGS in its environment

artifacts:
  # No trailing slash on directories unless you want contents-only behavior.
  include: ["migrations", "Dockerfile.vps"]
  exclude: ["data", "*.db", ".env", ".git", ".idea", ".vscode"]

# verify:
#   settle_delay_secs: 2
#   attempts: 15
#   interval_secs: 2
#   probe: remote   # or "local"

environments:
  prod:
    host: "vps.example.com"
    user: "__USER__"
    ssh_port: 22
    # ssh_key: "~/.ssh/id_ed25519_vps"
    target_dir: "/home/__USER__/web/__APP__"
    sync_env_file: ".env"
    # backups: 1

    traefik:
      network_name: "traefik-net"
      # cert_resolver: "myresolver"

    # database:
    #   driver: "sqlite"
    #   source: "data/__APP__.db"

    quadlet:
      service_name: "__APP__"
      image: "localhost/__APP__:latest"
      network: "traefik-net.network"
      auto_restart: true
      timezone: "Europe/Vienna"
      exec: "/__BINARY__"
      # stop_on_deploy: true
      # health_url: "http://localhost:8080/health"

      container_uid: 65532
      container_gid: 65532
      chown_volumes: ["./data"]

      volumes:
        - "./data:/data:Z"
        - "./migrations:/migrations:ro,Z"

      router:
        host: "__APP__.example.com"
        internal_port: 8080

      env_vars:
        - "APP_ENV=production"
"#;

/// Render the starter config for an app and SSH user
pub fn render_template(app_name: &str, user: &str) -> String {
    TEMPLATE
        .replace("__BINARY__", &format!("{}-server", app_name))
        .replace("__APP__", app_name)
        .replace("__USER__", user)
}

/// Lowercased directory name with spaces replaced
pub fn app_name_from_dir(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace(' ', "-"))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "app".to_string())
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .and_then(|u| u.rsplit('\\').next().map(str::to_string))
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "deploy_user".to_string())
}

/// Write a starter config at `path`; an existing file is never overwritten
pub async fn write_starter_config(path: &Path) -> Result<(), DeployError> {
    let file = File::new(path);
    if file.exists().await {
        return Err(DeployError::Precondition(format!(
            "{} already exists",
            path.display()
        )));
    }

    let cwd = std::env::current_dir()?;
    let app_name = app_name_from_dir(&cwd);
    let user = current_user();
    info!("Initializing {} for app '{}' with user '{}'", path.display(), app_name, user);

    file.write_string(&render_template(&app_name, &user)).await?;
    info!("Created {}. Edit 'host' and 'ssh_key' before the first release.", path.display());
    Ok(())
}
