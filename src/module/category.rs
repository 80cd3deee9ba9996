//! Module categories and pipeline phases
//!
//! A module declares one static [`ModuleCategory`]. The execution process drives
//! queries through [`PipelinePhase`]s. The two are related by an explicit
//! membership table instead of being the same enumeration: a network module
//! takes part in both the receive and the send phase, an observer sees every
//! phase.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stage being driven, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Receive,
    Parse,
    Process,
    Render,
    Send,
}

impl PipelinePhase {
    /// Every phase in the order the pipeline walks them.
    pub const ORDER: [PipelinePhase; 5] = [
        PipelinePhase::Receive,
        PipelinePhase::Parse,
        PipelinePhase::Process,
        PipelinePhase::Render,
        PipelinePhase::Send,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Receive => "receive",
            PipelinePhase::Parse => "parse",
            PipelinePhase::Process => "process",
            PipelinePhase::Render => "render",
            PipelinePhase::Send => "send",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Static type tag of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCategory {
    /// Owns framing on the wire: normalizes inbound data, finalizes outbound data.
    Network,
    /// Turns raw payloads into structured queries.
    Parser,
    /// Produces the answer for a query.
    Handler,
    /// Formats the answer for the client.
    Renderer,
    /// Sees every phase without owning any.
    Observer,
}

impl ModuleCategory {
    pub const ALL: [ModuleCategory; 5] = [
        ModuleCategory::Network,
        ModuleCategory::Parser,
        ModuleCategory::Handler,
        ModuleCategory::Renderer,
        ModuleCategory::Observer,
    ];

    /// Phases in which modules of this category are invoked.
    pub fn phases(&self) -> &'static [PipelinePhase] {
        match self {
            ModuleCategory::Network => &[PipelinePhase::Receive, PipelinePhase::Send],
            ModuleCategory::Parser => &[PipelinePhase::Parse],
            ModuleCategory::Handler => &[PipelinePhase::Process],
            ModuleCategory::Renderer => &[PipelinePhase::Render],
            ModuleCategory::Observer => &PipelinePhase::ORDER,
        }
    }

    pub fn participates_in(&self, phase: PipelinePhase) -> bool {
        self.phases().contains(&phase)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCategory::Network => "network",
            ModuleCategory::Parser => "parser",
            ModuleCategory::Handler => "handler",
            ModuleCategory::Renderer => "renderer",
            ModuleCategory::Observer => "observer",
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ModuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleCategory::ALL
            .iter()
            .copied()
            .find(|category| category.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown module category '{s}'"))
    }
}
