mod event;

pub use event::EngineEvent;

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::ResticConfig;
use crate::error::{PvesticError, Result};

/// Block size for the raw device read handed to restic's stdin command.
const STREAM_BLOCK_SIZE: &str = "1M";

/// One stored archive entry, as reported by `restic snapshots --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub tree: String,
}

/// Aggregate repository counters from `restic stats --mode raw-data --json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoStats {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub total_uncompressed_size: u64,
    #[serde(default)]
    pub compression_ratio: f64,
    #[serde(default)]
    pub total_blob_count: u64,
    #[serde(default)]
    pub snapshots_count: u64,
}

/// Look up the value of a `key=value` tag.
pub fn tag_value<'a>(tags: &'a [String], key: &str) -> Option<&'a str> {
    tags.iter().find_map(|t| {
        t.split_once('=')
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
    })
}

/// Invokes the restic binary with the configured repository environment.
pub struct Restic {
    env: Vec<(String, String)>,
}

impl Restic {
    pub fn from_config(config: &ResticConfig) -> Restic {
        let mut env = Vec::new();
        if let Some(repo) = &config.repository {
            env.push(("RESTIC_REPOSITORY".to_string(), repo.clone()));
        }
        if let Some(password) = &config.password {
            env.push(("RESTIC_PASSWORD".to_string(), password.clone()));
        }
        for (key, val) in &config.env {
            env.push((key.clone(), val.clone()));
        }
        Restic { env }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new("restic");
        cmd.args(args);
        for (key, val) in &self.env {
            cmd.env(key, val);
        }
        cmd
    }

    /// Run a restic verb with inherited stdio. Success ⇔ zero exit.
    pub fn run_passthrough(&self, args: &[String]) -> Result<()> {
        debug!("running restic {}", args.join(" "));
        let status = self.command(args).status()?;
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(PvesticError::Restic(format!(
                "restic {} exited with {code}",
                args.first().map(String::as_str).unwrap_or("")
            )));
        }
        Ok(())
    }

    fn run_captured(&self, args: &[&str]) -> Result<String> {
        debug!("running restic {}", args.join(" "));
        let output = self.command(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PvesticError::Restic(format!(
                "restic {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Lightweight repository reachability probe, run before any snapshot is
    /// touched.
    pub fn probe(&self) -> Result<()> {
        self.run_captured(&["snapshots"]).map(|_| ()).map_err(|e| {
            PvesticError::Config(format!(
                "restic repository is not reachable, maybe it needs 'restic init': {e}"
            ))
        })
    }

    pub fn snapshots(&self) -> Result<Vec<Snapshot>> {
        let out = self.run_captured(&["snapshots", "--json"])?;
        Ok(serde_json::from_str(&out)?)
    }

    pub fn stats(&self) -> Result<RepoStats> {
        let out = self.run_captured(&["stats", "--mode", "raw-data", "--json"])?;
        Ok(serde_json::from_str(&out)?)
    }

    /// Stream raw bytes from `source` into the repository as `dest_file`.
    ///
    /// Restic reads the bytes from a `dd` child it spawns itself; its `--json`
    /// stdout is decoded into [`EngineEvent`]s and fed to `on_event`, while
    /// stderr is drained on a separate thread so neither channel can stall
    /// the other. The exit status is checked only after the event stream is
    /// fully drained.
    pub fn stream_backup(
        &self,
        source: &Path,
        dest_file: &str,
        tags: &[(String, String)],
        on_event: &mut dyn FnMut(&EngineEvent),
    ) -> Result<()> {
        let mut args: Vec<String> = vec![
            "backup".to_string(),
            "--stdin-from-command".to_string(),
            "--stdin-filename".to_string(),
            dest_file.to_string(),
        ];
        for (key, val) in tags {
            args.push("--tag".to_string());
            args.push(format!("{key}={val}"));
        }
        args.push("--json".to_string());
        args.push("--".to_string());
        args.push("dd".to_string());
        args.push(format!("if={}", source.display()));
        args.push(format!("bs={STREAM_BLOCK_SIZE}"));

        debug!("running restic {}", args.join(" "));
        let mut cmd = self.command(&args);
        cmd.env("RESTIC_PROGRESS_FPS", "1");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let stderr = child.stderr.take();
        let drain = std::thread::spawn(move || {
            let Some(stderr) = stderr else { return };
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                if !is_noise_line(&line) {
                    eprintln!("{line}");
                }
            }
        });

        let mut last_error = None;
        let decoded = match child.stdout.take() {
            Some(stdout) => {
                drain_events(BufReader::new(stdout), &mut last_error, on_event)
            }
            None => Ok(()),
        };

        if decoded.is_err() {
            // The decode loop bailed early; don't leave restic writing into
            // a closed pipe.
            let _ = child.kill();
        }
        let _ = drain.join();
        let status = child.wait()?;
        decoded?;

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = last_error
                .map(|m| format!(": {m}"))
                .unwrap_or_default();
            return Err(PvesticError::Restic(format!(
                "restic backup of '{dest_file}' exited with {code}{detail}"
            )));
        }
        Ok(())
    }
}

fn drain_events<R: Read>(
    reader: R,
    last_error: &mut Option<String>,
    on_event: &mut dyn FnMut(&EngineEvent),
) -> Result<()> {
    for record in serde_json::Deserializer::from_reader(reader).into_iter::<Value>() {
        let event = EngineEvent::from_value(&record?);
        match &event {
            EngineEvent::Error { message } => {
                error!("restic: {message}");
                *last_error = Some(message.clone());
            }
            EngineEvent::Info { message } => eprintln!("{message}"),
            _ => {}
        }
        on_event(&event);
    }
    Ok(())
}

/// Stderr chatter that would drown the useful diagnostics: restic's echo of
/// the dd read command, parent-snapshot reuse notices and cache churn.
fn is_noise_line(line: &str) -> bool {
    line.starts_with("subprocess ")
        || line.contains("using parent snapshot")
        || line.contains("old cache directories")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tag_value_finds_key() {
        let t = tags(&["id=ab12", "vm=7", "name=web"]);
        assert_eq!(tag_value(&t, "id"), Some("ab12"));
        assert_eq!(tag_value(&t, "vm"), Some("7"));
        assert_eq!(tag_value(&t, "missing"), None);
    }

    #[test]
    fn tag_value_ignores_prefix_matches() {
        let t = tags(&["identity=x", "id=real"]);
        assert_eq!(tag_value(&t, "id"), Some("real"));
    }

    #[test]
    fn tag_value_keeps_equals_in_value() {
        let t = tags(&["srcFile=/dev/pve/a=b"]);
        assert_eq!(tag_value(&t, "srcFile"), Some("/dev/pve/a=b"));
    }

    #[test]
    fn env_built_from_config() {
        let mut config = ResticConfig {
            repository: Some("/mnt/backup/restic".to_string()),
            password: Some("secret".to_string()),
            env: Default::default(),
        };
        config
            .env
            .insert("AWS_ACCESS_KEY_ID".to_string(), "abc".to_string());
        let restic = Restic::from_config(&config);
        assert!(restic
            .env
            .contains(&("RESTIC_REPOSITORY".to_string(), "/mnt/backup/restic".to_string())));
        assert!(restic
            .env
            .contains(&("RESTIC_PASSWORD".to_string(), "secret".to_string())));
        assert!(restic
            .env
            .contains(&("AWS_ACCESS_KEY_ID".to_string(), "abc".to_string())));
    }

    #[test]
    fn noise_lines_are_suppressed() {
        assert!(is_noise_line("subprocess dd: 2048+0 records in"));
        assert!(is_noise_line("using parent snapshot 1a2b3c4d"));
        assert!(is_noise_line("removed 2 old cache directories"));
        assert!(!is_noise_line("Fatal: repository locked"));
        assert!(!is_noise_line(""));
    }

    #[test]
    fn snapshot_list_parses() {
        let json = r#"[
            {
                "id": "c3ab8ff1",
                "time": "2026-08-01T02:00:00Z",
                "tags": ["id=ab12", "vm=7"],
                "paths": ["/lxc-7/data.raw"],
                "hostname": "pve1",
                "tree": "deadbeef"
            },
            {"id": "0badcafe", "time": "2026-08-02T02:00:00+00:00"}
        ]"#;
        let snaps: Vec<Snapshot> = serde_json::from_str(json).unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(tag_value(&snaps[0].tags, "vm"), Some("7"));
        assert!(snaps[1].tags.is_empty());
        assert!(snaps[0].time < snaps[1].time);
    }

    #[test]
    fn repo_stats_parse_with_missing_fields() {
        let stats: RepoStats =
            serde_json::from_str(r#"{"total_size": 123, "snapshots_count": 4}"#).unwrap();
        assert_eq!(stats.total_size, 123);
        assert_eq!(stats.snapshots_count, 4);
        assert_eq!(stats.total_blob_count, 0);
    }

    #[test]
    fn drain_events_remembers_last_error_and_keeps_reading() {
        let input = concat!(
            r#"{"message_type":"status","bytes_done":10}"#,
            "\n",
            r#"{"message_type":"error","error":{"message":"repository locked"}}"#,
            "\n",
            r#"{"message_type":"status","bytes_done":20}"#,
            "\n",
        );
        let mut seen = Vec::new();
        let mut last_error = None;
        drain_events(input.as_bytes(), &mut last_error, &mut |e| {
            seen.push(e.clone())
        })
        .unwrap();
        assert_eq!(last_error.as_deref(), Some("repository locked"));
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], EngineEvent::Progress { bytes_done: 20.0 });
    }

    #[test]
    fn drain_events_fails_on_garbage() {
        let input = b"{\"message_type\":\"status\"}\nnot json at all\n";
        let mut last_error = None;
        let result = drain_events(&input[..], &mut last_error, &mut |_| {});
        assert!(result.is_err());
    }
}
