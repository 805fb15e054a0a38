//! Output formatting for the `causantic` binary: human-readable text or
//! pretty JSON for scripting, chosen by the `--format` flag.

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain-text, one line per result.
    Human,
    /// Pretty-printed JSON, for scripting.
    Json,
}

/// Implemented by every result type the CLI prints, giving it its own
/// human-readable rendering while JSON falls out of `Serialize` for
/// free.
pub trait Output: Serialize {
    fn write_human<W: Write>(&self, writer: W) -> anyhow::Result<()>;

    fn write<W: Write>(&self, writer: W, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Human => self.write_human(writer),
            OutputFormat::Json => {
                serde_json::to_writer_pretty(writer, self)?;
                Ok(())
            }
        }
    }

    fn print(&self, format: OutputFormat) -> anyhow::Result<()> {
        self.write(io::stdout(), format)
    }
}

impl Output for causantic_core::api::RankedHit {
    fn write_human<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(writer, "{:.4}  {:?}  {}  {}", self.final_score, self.source, self.chunk_id, self.preview)?;
        Ok(())
    }
}

impl Output for causantic_core::api::RankedHitWithChain {
    fn write_human<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(writer, "{:.4}  {:?}  {}  {}", self.hit.final_score, self.hit.source, self.hit.chunk_id, self.hit.preview)?;
        for link in &self.chain {
            writeln!(writer, "  +{} hop(s)  {:.4}  {}", link.hop, link.decayed_score, link.chunk_id)?;
        }
        Ok(())
    }
}

impl Output for causantic_core::api::ProjectInfo {
    fn write_human<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(writer, "{}  {} chunk(s)  {} .. {}", self.slug, self.chunk_count, self.first_seen, self.last_seen)?;
        Ok(())
    }
}

impl Output for causantic_core::api::SessionInfo {
    fn write_human<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(writer, "{}  {} chunk(s)  {} .. {}", self.session_id, self.chunk_count, self.start_time, self.end_time)?;
        Ok(())
    }
}

impl Output for causantic_core::types::Chunk {
    fn write_human<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        writeln!(writer, "--- {} [{}] {} ---", self.session_id, self.start_time, self.id)?;
        writeln!(writer, "{}", self.content)?;
        Ok(())
    }
}

impl Output for causantic_core::api::ForgetReport {
    fn write_human<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        let verb = if self.dry_run { "would remove" } else { "removed" };
        writeln!(
            writer,
            "{verb} {} chunk(s), {} edge(s), {} cluster assignment(s)",
            self.chunk_ids.len(),
            self.edges_removed,
            self.cluster_assignments_removed
        )?;
        for id in &self.chunk_ids {
            writeln!(writer, "  {id}")?;
        }
        Ok(())
    }
}
