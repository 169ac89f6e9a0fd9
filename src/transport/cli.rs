//! CLI transport for direct terminal interaction

use crate::config::Config;
use crate::core::{run_turn, ChatSession, DocumentSwap};
use crate::llm::prompt::GREETING;
use crate::llm::{chunk_text, FragmentSource, GeminiSource, ScriptedSource};
use crate::picker::{
    spawn_sandbox, DocumentGeneration, ElementId, HandleOutcome, Outbound, PointerButton,
    PointerEvent, Report, SandboxHandle, SandboxSettings, StaticDocument,
};
use crate::segments::{SegmentParser, CHOICES_CLOSE, CHOICES_OPEN, PAYLOAD_CLOSE, PAYLOAD_OPEN};
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Characters of element text shown by `/elements`
const ELEMENT_TEXT_PREVIEW: usize = 60;

/// Options for `flowr chat`
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub message: Option<String>,
    pub model: Option<String>,
    pub script: Option<PathBuf>,
    pub chunk_size: usize,
    pub preview: Option<PathBuf>,
}

/// Run interactive chat mode
pub async fn run_chat(options: ChatOptions) -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });
    let source = create_source(&config, &options)?;
    let preview_path = options.preview.clone().or_else(|| {
        config
            .preview
            .enabled
            .then(|| config.preview.path.clone())
    });

    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let mut repl = Repl {
        session: ChatSession::new(config.picker.rearm_on_swap),
        source,
        parser: SegmentParser::new(),
        host: DocumentHost {
            preview_path,
            settings: config.picker.sandbox_settings(),
            sandbox: None,
            document: None,
            reports_tx,
        },
    };
    tracing::info!(
        "Starting chat session {} with {} source",
        repl.session.id(),
        repl.source.name()
    );
    repl.run(reports_rx, options.message).await
}

/// Print the segment view of a saved turn as JSON
///
/// With `as_segments`, prints the ordered segment list instead.
pub fn run_parse(file: &Path, chunk_size: usize, as_segments: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut parser = SegmentParser::new();
    let view = parser.drive(chunk_text(&text, chunk_size));
    let json = if as_segments {
        serde_json::to_string_pretty(&view.segments())?
    } else {
        serde_json::to_string_pretty(view)?
    };
    println!("{}", json);
    Ok(())
}

/// Write the default configuration to the config file
pub fn run_init(force: bool) -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn create_source(config: &Config, options: &ChatOptions) -> Result<Box<dyn FragmentSource>> {
    if let Some(script) = &options.script {
        let text = std::fs::read_to_string(script)
            .with_context(|| format!("Failed to read script {}", script.display()))?;
        let source = ScriptedSource::from_script(&text, options.chunk_size);
        tracing::info!(
            "Replaying {} scripted turn(s) from {}",
            source.turn_count(),
            script.display()
        );
        return Ok(Box::new(source));
    }

    let mut source = GeminiSource::new(&config.llm.gemini).context(
        "Google Gemini not configured.\n\n\
         Set the GEMINI_API_KEY environment variable:\n\
           export GEMINI_API_KEY=\"your-api-key-here\"\n\
         Get your API key from: https://aistudio.google.com/apikey\n\
         \n\
         Or replay a canned conversation with --script FILE",
    )?;
    if let Some(model) = &options.model {
        source = source.with_model(model);
    }
    Ok(Box::new(source))
}

enum Flow {
    Continue,
    Quit,
}

struct Repl {
    session: ChatSession,
    source: Box<dyn FragmentSource>,
    parser: SegmentParser,
    host: DocumentHost,
}

impl Repl {
    async fn run(
        &mut self,
        mut reports: mpsc::UnboundedReceiver<Report>,
        initial_message: Option<String>,
    ) -> Result<()> {
        println!("{}", "flowr - website builder".bold().cyan());
        println!("{}", "Type /help for commands, /quit to exit".dimmed());
        println!("\n{}\n", GREETING);

        if let Some(message) = initial_message {
            println!("> {}\n", message);
            self.submit(&message).await?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                Some((generation, raw)) = reports.recv() => {
                    self.on_report(generation, &raw);
                    continue;
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    None
                }
            };
            let Some(line) = line else { break };

            if let Flow::Quit = self.dispatch(line.trim()).await? {
                break;
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    async fn dispatch(&mut self, input: &str) -> Result<Flow> {
        if input.is_empty() {
            return Ok(Flow::Continue);
        }

        if let Ok(number) = input.parse::<usize>() {
            match self.session.activate_choice(number) {
                Ok(value) => {
                    println!("> {}\n", value);
                    self.submit(&value).await?;
                }
                Err(e) => print_error(&e),
            }
            return Ok(Flow::Continue);
        }

        let (command, arg) = match input.split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (input, ""),
        };
        match command {
            "/quit" | "/exit" => return Ok(Flow::Quit),
            "/help" => print_help(),
            "/pick" => self.start_picking(),
            "/cancel" => self.cancel_picking(),
            "/elements" => self.list_elements(),
            "/hover" => self.send_pointer(arg, false),
            "/click" => self.send_pointer(arg, true),
            "/selection" => match self.session.selection() {
                Some(element) => println!("{}\n", element.as_context()),
                None => println!("{}", "No element selected.".dimmed()),
            },
            "/clear" => {
                self.session.clear_selection();
                println!("Selection cleared.");
            }
            "/save" => self.save(arg)?,
            other if other.starts_with('/') => {
                println!("{} {} (try /help)", "Unknown command:".yellow(), other)
            }
            _ => match self.session.activate_choice_label(input) {
                // Typing a choice's label picks that choice
                Some(value) => {
                    println!("> {}\n", value);
                    self.submit(&value).await?;
                }
                None => self.submit(input).await?,
            },
        }
        Ok(Flow::Continue)
    }

    /// Stream one assistant turn for `text`
    async fn submit(&mut self, text: &str) -> Result<()> {
        let messages = match self.session.begin_turn(text) {
            Ok(messages) => messages,
            Err(e) => {
                print_error(&e);
                return Ok(());
            }
        };

        let mut printer = StreamPrinter::default();
        let mut notes = Vec::new();
        let session = &mut self.session;
        let host = &mut self.host;
        let interrupt = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        let outcome = run_turn(
            self.source.as_ref(),
            &messages,
            &mut self.parser,
            interrupt,
            |view| {
                printer.update(&view.display_text);
                if let Some(swap) = session.observe(view) {
                    notes.push(host.apply(swap));
                }
            },
        )
        .await;

        printer.finish(&outcome.display_text());
        if let Some(swap) = self.session.finish_turn(&outcome)? {
            notes.push(self.host.apply(swap));
        }
        if outcome.interrupted {
            println!("{}", "(interrupted)".yellow());
        }
        for note in notes {
            println!("{}", note.green());
        }

        let choices = self.session.choices().choices();
        if !choices.is_empty() {
            for (i, choice) in choices.iter().enumerate() {
                println!("  {} {}", format!("{}.", i + 1).bold(), choice.label);
            }
            println!("{}", "Enter a number to choose.".dimmed());
        }
        println!();
        Ok(())
    }

    fn on_report(&mut self, generation: DocumentGeneration, raw: &str) {
        match self.session.handle_report(generation, raw) {
            Some(HandleOutcome::Picked) => {
                if let Some(element) = self.session.selection() {
                    println!(
                        "\n{} {}",
                        "Selected".green().bold(),
                        element.css_selector()
                    );
                    println!(
                        "{}",
                        "Your next message will refer to this element.".dimmed()
                    );
                }
            }
            Some(HandleOutcome::Superseded) => {
                tracing::debug!("Dropped a report answering an earlier /pick")
            }
            _ => {}
        }
    }

    fn start_picking(&mut self) {
        match self.session.start_picking() {
            Ok(outbound) => {
                for message in outbound {
                    self.host.deliver(message);
                }
                println!("Picking. Use /elements, /hover N and /click N; /cancel to stop.");
            }
            Err(e) => print_error(&e),
        }
    }

    fn cancel_picking(&mut self) {
        match self.session.cancel_picking() {
            Some(message) => {
                self.host.deliver(message);
                println!("Picking cancelled.");
            }
            None => println!("{}", "Not picking.".dimmed()),
        }
    }

    fn list_elements(&self) {
        let Some(document) = &self.host.document else {
            println!("{}", "No document rendered yet.".dimmed());
            return;
        };
        for summary in document.summaries(ELEMENT_TEXT_PREVIEW) {
            println!(
                "{:>4}  {}{}  {}",
                summary.id.0,
                "  ".repeat(summary.depth),
                summary.selector.cyan(),
                summary.text.dimmed()
            );
        }
    }

    fn send_pointer(&self, arg: &str, click: bool) {
        let Ok(index) = arg.parse::<usize>() else {
            println!("{}", "Usage: /hover N or /click N".yellow());
            return;
        };
        let Some(sandbox) = &self.host.sandbox else {
            println!("{}", "No document rendered yet.".dimmed());
            return;
        };
        let event = if click {
            PointerEvent::Click {
                target: ElementId(index),
                button: PointerButton::Primary,
            }
        } else {
            PointerEvent::Move(Some(ElementId(index)))
        };
        if let Err(e) = sandbox.pointer(event) {
            tracing::warn!("Failed to deliver pointer event: {}", e);
        }
    }

    fn save(&self, arg: &str) -> Result<()> {
        if arg.is_empty() {
            println!("{}", "Usage: /save PATH".yellow());
            return Ok(());
        }
        let Some(document) = self.session.document() else {
            println!("{}", "No document rendered yet.".dimmed());
            return Ok(());
        };
        std::fs::write(arg, &document.markup)
            .with_context(|| format!("Failed to write {}", arg))?;
        println!("Saved to {}", arg);
        Ok(())
    }
}

/// The rendered document: preview file, sandboxed instance and a local
/// copy for listing elements
struct DocumentHost {
    preview_path: Option<PathBuf>,
    settings: SandboxSettings,
    sandbox: Option<SandboxHandle>,
    document: Option<StaticDocument>,
    reports_tx: mpsc::UnboundedSender<Report>,
}

impl DocumentHost {
    /// Replace the sandboxed instance; returns a note for the user
    fn apply(&mut self, swap: DocumentSwap) -> String {
        // The old instance goes first so it can no longer report
        self.sandbox = None;

        let handle = spawn_sandbox(
            swap.generation,
            StaticDocument::parse(swap.markup.clone()),
            self.settings.clone(),
            self.reports_tx.clone(),
        );
        self.sandbox = Some(handle);
        for message in swap.outbound {
            self.deliver(message);
        }

        let note = match &self.preview_path {
            Some(path) => match std::fs::write(path, &swap.markup) {
                Ok(()) => format!("Preview written to {}", path.display()),
                Err(e) => {
                    tracing::warn!("Failed to write preview {}: {}", path.display(), e);
                    format!("Website updated (preview not written: {})", e)
                }
            },
            None => "Website updated.".to_string(),
        };
        self.document = Some(StaticDocument::parse(swap.markup));
        note
    }

    /// Post to the running instance if it is the one addressed
    fn deliver(&self, outbound: Outbound) {
        match &self.sandbox {
            Some(sandbox) if sandbox.generation() == outbound.generation => {
                if let Err(e) = sandbox.post(&outbound.message) {
                    tracing::warn!("Failed to post to sandbox: {}", e);
                }
            }
            _ => tracing::debug!(
                "Dropping message for document {} that is not running",
                outbound.generation
            ),
        }
    }
}

/// Prints display text as it grows
///
/// Display text is recomputed from scratch on every fragment, so it does not
/// always extend what was printed; when it diverges, the changed lines are
/// printed again.
#[derive(Debug, Default)]
struct StreamPrinter {
    printed: String,
}

impl StreamPrinter {
    fn update(&mut self, display_text: &str) {
        let stable = &display_text[..stable_len(display_text)];
        self.emit(stable);
    }

    fn finish(&mut self, display_text: &str) {
        self.emit(display_text);
        println!("\n");
    }

    fn emit(&mut self, text: &str) {
        let out = self.delta(text);
        if !out.is_empty() {
            print!("{}", out);
            let _ = io::stdout().flush();
        }
    }

    fn delta(&mut self, text: &str) -> String {
        if let Some(rest) = text.strip_prefix(self.printed.as_str()) {
            let out = rest.to_string();
            self.printed = text.to_string();
            return out;
        }
        let common = common_prefix_len(&self.printed, text);
        let line_start = text[..common].rfind('\n').map(|i| i + 1).unwrap_or(0);
        self.printed = text.to_string();
        format!("\n{}", &text[line_start..])
    }
}

/// Length of `text` without a trailing partial marker
fn stable_len(text: &str) -> usize {
    const MARKERS: [&str; 4] = [PAYLOAD_OPEN, PAYLOAD_CLOSE, CHOICES_OPEN, CHOICES_CLOSE];
    let longest = MARKERS.iter().map(|m| m.len()).max().unwrap_or(0);
    text.char_indices()
        .filter(|(i, c)| *c == '<' && text.len() - i < longest)
        .map(|(i, _)| i)
        .find(|&i| MARKERS.iter().any(|m| m.starts_with(&text[i..])))
        .unwrap_or(text.len())
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn print_error(e: &dyn std::fmt::Display) {
    println!("{} {}", "Error:".red().bold(), e);
}

fn print_help() {
    println!(
        "\
Commands:
  <text>        send a message
  N or LABEL    choose option N, or the option labelled LABEL
  /pick         pick an element of the rendered site
  /cancel       stop picking
  /elements     list elements of the rendered site
  /hover N      move the pointer over element N
  /click N      click element N
  /selection    show the picked element
  /clear        forget the picked element
  /save PATH    write the site to PATH
  /quit         exit
"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_len_holds_back_partial_marker() {
        assert_eq!(stable_len("Here<<<CODE_"), 4);
        assert_eq!(stable_len("Here<"), 4);
        assert_eq!(stable_len("a < b"), 5);
        assert_eq!(stable_len("<div>"), 5);
        assert_eq!(stable_len("plain"), 5);
    }

    #[test]
    fn test_printer_appends_deltas() {
        let mut printer = StreamPrinter::default();
        assert_eq!(printer.delta("Hel"), "Hel");
        assert_eq!(printer.delta("Hello"), "lo");
        assert_eq!(printer.delta("Hello"), "");
    }

    #[test]
    fn test_printer_reprints_changed_line() {
        let mut printer = StreamPrinter::default();
        printer.delta("Here\n\n*Generating website…*");
        assert_eq!(
            printer.delta("Here\n\n*Website updated.*"),
            "\n*Website updated.*"
        );
    }

    #[test]
    fn test_common_prefix_is_char_aligned() {
        assert_eq!(common_prefix_len("héllo", "hélp"), 4);
        assert_eq!(common_prefix_len("ab", "abc"), 2);
        assert_eq!(common_prefix_len("é", "è"), 0);
    }

    #[tokio::test]
    async fn test_document_host_drops_messages_for_old_generation() {
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
        let mut host = DocumentHost {
            preview_path: None,
            settings: SandboxSettings::default(),
            sandbox: None,
            document: None,
            reports_tx,
        };
        let markup = "<body><h1 id=\"t\">Hi</h1></body>".to_string();
        let note = host.apply(DocumentSwap {
            generation: 2,
            markup: markup.clone(),
            outbound: vec![],
        });
        assert_eq!(note, "Website updated.");
        assert!(host.document.is_some());

        // Armed through the current generation, a click reports
        host.deliver(Outbound {
            generation: 1,
            message: crate::picker::HostMessage::SetPicking {
                active: true,
                cycle: 1,
            },
        });
        host.deliver(Outbound {
            generation: 2,
            message: crate::picker::HostMessage::SetPicking {
                active: true,
                cycle: 1,
            },
        });
        let target = StaticDocument::parse(markup).find_by_dom_id("t").unwrap();
        host.sandbox
            .as_ref()
            .unwrap()
            .pointer(PointerEvent::Click {
                target,
                button: PointerButton::Primary,
            })
            .unwrap();
        let (generation, raw) = reports_rx.recv().await.unwrap();
        assert_eq!(generation, 2);
        assert!(raw.contains("\"cssSelector\":\"h1#t\""));
    }
}
