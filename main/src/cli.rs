use std::{fmt::Write as _, path::PathBuf};

use clap::{Parser, Subcommand};
use retrieval_pipeline::{AnswerOutcome, AnswerResult};

#[derive(Debug, Parser)]
#[command(name = "main")]
#[command(about = "Answer questions about the Bhagavad Gita from an indexed set of slokas")]
#[command(version)]
pub struct Cli {
    /// Override the dataset path from configuration
    #[arg(long, global = true)]
    pub dataset: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask a single question and print the answer
    Ask {
        /// The question, in plain words
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Number of slokas to retrieve as context
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Read questions from stdin, one per line, until EOF or "exit"
    Chat {
        /// Number of slokas to retrieve as context
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Build the index and write it as a snapshot
    Index {
        /// Snapshot destination; defaults to the configured index_path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Serve the JSON API
    Serve {
        /// Port to listen on; defaults to the configured http_port
        #[arg(long)]
        port: Option<u16>,
    },
}

pub fn is_exit_command(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "exit" | "quit")
}

/// Human-readable rendering of an answer for terminal output.
pub fn render_answer(result: &AnswerResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", result.answer);

    if result.outcome == AnswerOutcome::Answered && !result.sources.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Sources:");
        for source in &result.sources {
            let _ = writeln!(
                out,
                "  {}. Sloka {} (relevance {:.3})",
                source.rank, source.sloka, source.relevance
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use retrieval_pipeline::SourceRef;

    use super::*;

    #[test]
    fn ask_joins_words_and_reads_k() {
        let cli = Cli::try_parse_from(["main", "ask", "Who", "is", "Drona?", "-k", "5"]).unwrap();
        match cli.command {
            Command::Ask { question, k } => {
                assert_eq!(question.join(" "), "Who is Drona?");
                assert_eq!(k, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ask_requires_a_question() {
        assert!(Cli::try_parse_from(["main", "ask"]).is_err());
    }

    #[test]
    fn index_and_serve_take_optional_overrides() {
        let cli = Cli::try_parse_from(["main", "index", "--out", "snap.json"]).unwrap();
        assert!(matches!(cli.command, Command::Index { out: Some(ref p) } if p.ends_with("snap.json")));

        let cli = Cli::try_parse_from(["main", "serve"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: None }));
    }

    #[test]
    fn exit_words_end_the_chat() {
        assert!(is_exit_command(" Exit "));
        assert!(is_exit_command("quit"));
        assert!(!is_exit_command("Who exited the battlefield?"));
    }

    #[test]
    fn sources_are_listed_only_for_answers() {
        let mut result = AnswerResult {
            question: "Who blew the conch?".into(),
            answer: "Bhishma did.".into(),
            outcome: AnswerOutcome::Answered,
            sources: vec![SourceRef {
                id: 11,
                sloka: 12,
                rank: 1,
                distance: 0.5,
                relevance: 0.75,
                text: "...".into(),
            }],
        };

        let rendered = render_answer(&result);
        assert!(rendered.starts_with("Bhishma did.\n"));
        assert!(rendered.contains("1. Sloka 12 (relevance 0.750)"));

        result.outcome = AnswerOutcome::Fallback;
        assert!(!render_answer(&result).contains("Sources:"));
    }
}
