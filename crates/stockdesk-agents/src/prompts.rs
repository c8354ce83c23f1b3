use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Returned verbatim whenever a role's prompt file cannot be used.
pub const FALLBACK_PROMPT: &str = "You are an AI agent. Please help the user with their request.";

/// Resolves agent roles to instruction text stored under a prompts directory.
#[derive(Debug, Clone)]
pub struct PromptLoader {
    dir: PathBuf,
}

impl PromptLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `role`: `<dir>/<role>_prompt.txt`, or `<dir>/<role>` when
    /// the role is already a file name.
    pub fn path_for(&self, role: &str) -> PathBuf {
        if role.ends_with(".txt") {
            self.dir.join(role)
        } else {
            self.dir.join(format!("{role}_prompt.txt"))
        }
    }

    /// Load the trimmed prompt for `role`. Never fails: a missing, unreadable
    /// or empty file yields [`FALLBACK_PROMPT`].
    pub fn load(&self, role: &str) -> String {
        let path = self.path_for(role);
        match std::fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => {
                debug!(role, path = %path.display(), "Loaded prompt");
                text.trim().to_string()
            }
            Ok(_) => {
                warn!(role, path = %path.display(), "Prompt file is empty, using default prompt");
                FALLBACK_PROMPT.to_string()
            }
            Err(e) => {
                warn!(role, path = %path.display(), error = %e, "Prompt file not found, using default prompt");
                FALLBACK_PROMPT.to_string()
            }
        }
    }
}

/// Single-shot prompt for `stockdesk direct`, which skips the agent roster.
pub fn direct_analysis_prompt(query: &str) -> String {
    format!(
        "You are an expert stock market analyst specializing in NYSE-listed stocks.\n\n\
         The user has requested: \"{query}\"\n\n\
         Please provide a comprehensive stock recommendation analysis including:\n\n\
         **STOCK SELECTION (2-3 stocks):**\n\
         For each: ticker, company name, current price, market cap, sector, and why it is promising.\n\n\
         **MARKET ANALYSIS:**\n\
         For each selected stock: 7-day and 30-day trends, volume analysis, technical indicators \
         (RSI, moving averages), and key news or events.\n\n\
         **TRADING RECOMMENDATIONS:**\n\
         For each stock: action (BUY/SELL/HOLD), target price, stop loss, time horizon, \
         risk level, and reasoning.\n\n\
         **PORTFOLIO CONSIDERATIONS:**\n\
         Diversification, risk management, and the current market environment.\n\n\
         Focus on well-known, liquid stocks with good trading volume. Provide actionable, \
         specific recommendations with clear reasoning."
    )
}
