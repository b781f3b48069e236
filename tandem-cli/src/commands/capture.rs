//! `tandem capture`: run a scripted commit.
//!
//! ```yaml
//! subject: posts#1
//! except: [audits]
//! mutations:
//!   - op: insert
//!     key: posts#1
//!     attrs: { title: hello }
//!   - op: insert
//!     key: audits#1
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use tandem_core::types::{Attributes, Key};

use super::{home_dir, open_workspace};

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Path to the YAML capture script.
    pub script: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MutationOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
struct Mutation {
    op: MutationOp,
    key: String,
    #[serde(default)]
    attrs: Attributes,
}

#[derive(Debug, Deserialize)]
struct CaptureScript {
    subject: Option<String>,
    #[serde(default)]
    except: Vec<String>,
    mutations: Option<Vec<Mutation>>,
}

fn parse_key(raw: &str) -> Result<Key> {
    raw.parse::<Key>().map_err(anyhow::Error::msg)
}

impl CaptureArgs {
    pub fn run(self) -> Result<()> {
        let contents = std::fs::read_to_string(&self.script)
            .with_context(|| format!("failed to read script {}", self.script.display()))?;
        let script: CaptureScript = serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid capture script {}", self.script.display()))?;

        let subject = script.subject.as_deref().map(parse_key).transpose()?;
        let mutations = script
            .mutations
            .map(|list| {
                list.into_iter()
                    .map(|m| Ok((m.op, parse_key(&m.key)?, m.attrs)))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let home = home_dir()?;
        let workspace = open_workspace(&home)?;
        let session = workspace.staging.session();

        let mut capture = session.capture();
        if let Some(subject) = subject {
            capture = capture.subject(subject);
        }
        for table in &script.except {
            capture = capture.except(table.as_str());
        }
        if let Some(mutations) = mutations {
            capture = capture.body(move |s| {
                for (op, key, attrs) in mutations {
                    match op {
                        MutationOp::Insert => s.insert(&key, attrs)?,
                        MutationOp::Update => s.update(&key, attrs)?,
                        MutationOp::Delete => s.delete(&key)?,
                    };
                }
                Ok(())
            });
        }

        let outcome = capture.run();
        workspace
            .save_at(&home)
            .context("failed to save workspace")?;

        match outcome.context("capture failed")? {
            Some(commit) => {
                let entries = workspace
                    .staging
                    .with_log(|log| commit.entries(log).len());
                println!("✓ captured commit {} ({entries} log entries)", commit.id);
            }
            None => println!("✓ nothing captured"),
        }
        Ok(())
    }
}
