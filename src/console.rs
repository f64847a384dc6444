//! Line-oriented stdin console that drives the detector.
//!
//! Reading stdin blocks, so the reader lives on its own OS thread and
//! forwards parsed commands with `blocking_send`.  `quit` or EOF drops the
//! sender, which ends [`WakewordDetector::run`](crate::wakeword::WakewordDetector::run).
//!
//! ```text
//! enable | disable           master switch
//! engines                    refresh the engine list
//! engine <name>              select an engine
//! info [name]                engine description, links and parameters
//! wakewords <a,b,...>        replace the wake-word list
//! set <param> <value>        override one engine parameter
//! start | stop | toggle      control listening
//! status                     print the panel state
//! help | quit
//! ```

use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::catalog::{EngineParamDescriptor, InferType, ParamValue};
use crate::wakeword::{DetectorCommand, ParamSchema, SettingsStore, UiState};

pub const HELP: &str = "\
commands:
  enable | disable          turn wake-word listening on or off
  engines                   refresh the engine list
  engine <name>             select an engine
  info [name]               describe an engine (default: the selected one)
  wakewords <a,b,...>       set the comma-separated wake-word list
  set <param> <value>       override an engine parameter
  start | stop | toggle     control listening
  status                    show the current state
  help                      show this text
  quit                      exit";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(DetectorCommand),
    Status,
    /// Engine details; `None` means the selected engine.
    Info(Option<String>),
    Help,
    Quit,
}

/// Parse one line.  `Ok(None)` for blank lines.
///
/// ```
/// use sentio_wakeword::console::{parse_line, ConsoleInput};
/// use sentio_wakeword::wakeword::DetectorCommand;
///
/// assert_eq!(
///     parse_line("engine funasr").unwrap(),
///     Some(ConsoleInput::Command(DetectorCommand::SelectEngine("funasr".into())))
/// );
/// assert!(parse_line("bogus").is_err());
/// ```
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "enable" => DetectorCommand::Enable(true),
        "disable" => DetectorCommand::Enable(false),
        "engines" => DetectorCommand::RefreshEngines,
        "engine" if !rest.is_empty() => DetectorCommand::SelectEngine(rest.to_owned()),
        "engine" => return Err("usage: engine <name>".into()),
        // An empty list is allowed and clears the wake-words.
        "wakewords" => DetectorCommand::SetWakewords(rest.to_owned()),
        "set" => match rest.split_once(char::is_whitespace) {
            Some((name, value)) => {
                DetectorCommand::SetEngineParam(name.to_owned(), ParamValue::parse(value))
            }
            None => return Err("usage: set <param> <value>".into()),
        },
        "start" => DetectorCommand::Start,
        "stop" => DetectorCommand::Stop,
        "toggle" => DetectorCommand::Toggle,
        "status" => return Ok(Some(ConsoleInput::Status)),
        "info" if rest.is_empty() => return Ok(Some(ConsoleInput::Info(None))),
        "info" => return Ok(Some(ConsoleInput::Info(Some(rest.to_owned())))),
        "help" | "?" => return Ok(Some(ConsoleInput::Help)),
        "quit" | "exit" => return Ok(Some(ConsoleInput::Quit)),
        other => return Err(format!("unknown command `{other}` (try `help`)")),
    };
    Ok(Some(ConsoleInput::Command(command)))
}

/// Multi-line summary of the panel state.
pub fn format_status(ui: &UiState) -> String {
    let params = match &ui.param_schema {
        ParamSchema::Empty => "-".to_string(),
        ParamSchema::Loading => "loading…".to_string(),
        ParamSchema::Ready(_) if ui.engine_settings.is_empty() => "(none)".to_string(),
        ParamSchema::Ready(_) => ui
            .engine_settings
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", "),
    };
    let status = if ui.wakeword_detected {
        "wake-word detected"
    } else {
        ui.state.label()
    };

    format!(
        "enabled:    {}\n\
         engine:     {} (available: {})\n\
         params:     {}\n\
         wakewords:  {}\n\
         status:     {}\n\
         chat mode:  {}\n\
         partial:    {}\n\
         last:       {}",
        ui.enabled,
        ui.engine.as_deref().unwrap_or("-"),
        if ui.engines.is_empty() {
            "-".to_string()
        } else {
            ui.engines
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        },
        params,
        ui.wakewords,
        status,
        ui.chat_mode.label(),
        ui.partial_text,
        ui.last_detected_text.as_deref().unwrap_or("-"),
    )
}

/// Description, links and parameter schema of one engine.
///
/// Parameters are only known for the selected engine; other engines show
/// their catalog entry alone.
pub fn format_engine_info(ui: &UiState, name: Option<&str>) -> Result<String, String> {
    let Some(name) = name.or(ui.engine.as_deref()) else {
        return Err("no engine selected (try `engine <name>`)".into());
    };
    let engine = ui
        .engines
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| format!("unknown engine `{name}` (try `engines`)"))?;

    let infer = match engine.infer_type {
        InferType::Stream => "stream",
        InferType::Normal => "normal",
    };
    let mut out = format!("{} ({infer})", engine.name);
    if !engine.desc.is_empty() {
        out.push_str(&format!("\n  {}", engine.desc));
    }
    let meta = &engine.meta;
    for (label, value) in [
        ("official:", &meta.official),
        ("config help:", &meta.configuration),
        ("tips:", &meta.tips),
        ("fee:", &meta.fee),
    ] {
        if let Some(value) = value {
            out.push_str(&format!("\n  {label:<14}{value}"));
        }
    }

    if ui.engine.as_deref() != Some(name) {
        out.push_str("\n  parameters:   select the engine to load them");
        return Ok(out);
    }
    match &ui.param_schema {
        ParamSchema::Empty => out.push_str("\n  parameters:   -"),
        ParamSchema::Loading => out.push_str("\n  parameters:   loading…"),
        ParamSchema::Ready(params) if params.is_empty() => {
            out.push_str("\n  parameters:   (none)");
        }
        ParamSchema::Ready(params) => {
            out.push_str("\n  parameters:");
            for param in params {
                out.push_str(&format_param(ui, param));
            }
        }
    }
    Ok(out)
}

fn format_param(ui: &UiState, param: &EngineParamDescriptor) -> String {
    let current = ui
        .engine_settings
        .get(&param.name)
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let mut out = format!("\n    {} = {current}", param.name);
    if !param.param_type.is_empty() {
        out.push_str(&format!(" ({})", param.param_type));
    }
    if param.required {
        out.push_str(" [required]");
    }
    if !param.description.is_empty() {
        out.push_str(&format!("\n        {}", param.description));
    }
    if !param.choices.is_empty() {
        out.push_str(&format!("\n        choices: {}", join_values(&param.choices, ", ")));
    }
    if !param.range.is_empty() {
        out.push_str(&format!("\n        range: {}", join_values(&param.range, " .. ")));
    }
    if let Some(default) = &param.default {
        out.push_str(&format!("\n        default: {default}"));
    }
    out
}

fn join_values(values: &[ParamValue], sep: &str) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

// ---------------------------------------------------------------------------
// ConsoleReader
// ---------------------------------------------------------------------------

/// Handle to the stdin reader thread.
pub struct ConsoleReader {
    _thread: JoinHandle<()>,
}

impl ConsoleReader {
    /// Spawn the reader thread on stdin.
    pub fn start(
        store: Arc<SettingsStore>,
        tx: mpsc::Sender<DetectorCommand>,
    ) -> std::io::Result<Self> {
        let thread = std::thread::Builder::new()
            .name("console-reader".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                read_commands(stdin.lock(), &store, &tx);
                log::debug!("console: input closed");
            })?;
        Ok(Self { _thread: thread })
    }
}

/// Read lines from `input` until EOF or `quit`, forwarding commands to `tx`.
pub fn read_commands<R: BufRead>(
    input: R,
    store: &SettingsStore,
    tx: &mpsc::Sender<DetectorCommand>,
) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("console: failed to read input: {e}");
                break;
            }
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleInput::Command(command))) => {
                if tx.blocking_send(command).is_err() {
                    log::debug!("console: detector gone");
                    break;
                }
            }
            Ok(Some(ConsoleInput::Status)) => println!("{}", format_status(&store.snapshot())),
            Ok(Some(ConsoleInput::Info(name))) => {
                match format_engine_info(&store.snapshot(), name.as_deref()) {
                    Ok(info) => println!("{info}"),
                    Err(message) => eprintln!("{message}"),
                }
            }
            Ok(Some(ConsoleInput::Help)) => println!("{HELP}"),
            Ok(Some(ConsoleInput::Quit)) => break,
            Err(message) => eprintln!("{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EngineDescriptor, EngineMeta};
    use crate::config::AppConfig;

    fn funasr() -> EngineDescriptor {
        EngineDescriptor {
            name: "funasr".into(),
            desc: "FunASR streaming recognition".into(),
            infer_type: InferType::Stream,
            meta: EngineMeta {
                official: Some("https://github.com/modelscope/FunASR".into()),
                configuration: Some("https://example.org/funasr/config".into()),
                tips: Some("run the websocket server first".into()),
                fee: None,
            },
        }
    }

    fn mode_param() -> EngineParamDescriptor {
        EngineParamDescriptor {
            name: "mode".into(),
            description: "recognition mode".into(),
            param_type: "string".into(),
            required: true,
            range: Vec::new(),
            choices: vec![
                ParamValue::Text("online".into()),
                ParamValue::Text("2pass".into()),
            ],
            default: Some(ParamValue::Text("2pass".into())),
        }
    }

    fn command(line: &str) -> DetectorCommand {
        match parse_line(line) {
            Ok(Some(ConsoleInput::Command(command))) => command,
            other => panic!("`{line}` parsed as {other:?}"),
        }
    }

    #[test]
    fn parses_detector_commands() {
        assert_eq!(command("enable"), DetectorCommand::Enable(true));
        assert_eq!(command("disable"), DetectorCommand::Enable(false));
        assert_eq!(command("engines"), DetectorCommand::RefreshEngines);
        assert_eq!(command("  start "), DetectorCommand::Start);
        assert_eq!(command("stop"), DetectorCommand::Stop);
        assert_eq!(command("toggle"), DetectorCommand::Toggle);
        assert_eq!(
            command("wakewords hello, hey sentio"),
            DetectorCommand::SetWakewords("hello, hey sentio".into())
        );
        assert_eq!(command("wakewords"), DetectorCommand::SetWakewords(String::new()));
    }

    #[test]
    fn set_parses_typed_values() {
        assert_eq!(
            command("set rate 5"),
            DetectorCommand::SetEngineParam("rate".into(), ParamValue::Int(5))
        );
        assert_eq!(
            command("set lang zh cn"),
            DetectorCommand::SetEngineParam("lang".into(), ParamValue::Text("zh cn".into()))
        );
    }

    #[test]
    fn usage_errors() {
        assert!(parse_line("engine").is_err());
        assert!(parse_line("set rate").is_err());
        assert!(parse_line("launch").is_err());
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn console_only_inputs() {
        assert_eq!(parse_line("status").unwrap(), Some(ConsoleInput::Status));
        assert_eq!(parse_line("info").unwrap(), Some(ConsoleInput::Info(None)));
        assert_eq!(
            parse_line("info  kws ").unwrap(),
            Some(ConsoleInput::Info(Some("kws".into())))
        );
        assert_eq!(parse_line("?").unwrap(), Some(ConsoleInput::Help));
        assert_eq!(parse_line("quit").unwrap(), Some(ConsoleInput::Quit));
    }

    #[test]
    fn read_commands_stops_at_quit() {
        let store = SettingsStore::in_memory(AppConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let input = std::io::Cursor::new("enable\n\nbogus\nstart\nquit\nstop\n");

        read_commands(input, &store, &tx);

        assert_eq!(rx.try_recv().unwrap(), DetectorCommand::Enable(true));
        assert_eq!(rx.try_recv().unwrap(), DetectorCommand::Start);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn status_shows_engine_and_detection() {
        let mut ui = UiState::from_config(&AppConfig::default());
        ui.engine = Some("funasr".into());
        ui.wakeword_detected = true;
        let text = format_status(&ui);
        assert!(text.contains("engine:     funasr"));
        assert!(text.contains("wake-word detected"));
    }

    #[test]
    fn info_shows_description_links_and_parameters() {
        let mut ui = UiState::from_config(&AppConfig::default());
        ui.engines = vec![funasr()];
        ui.engine = Some("funasr".into());
        ui.param_schema = ParamSchema::Ready(vec![mode_param()]);
        ui.engine_settings
            .insert("mode".into(), ParamValue::Text("online".into()));

        let text = format_engine_info(&ui, None).unwrap();
        assert!(text.starts_with("funasr (stream)\n  FunASR streaming recognition"));
        assert!(text.contains("official:     https://github.com/modelscope/FunASR"));
        assert!(text.contains("config help:  https://example.org/funasr/config"));
        assert!(text.contains("tips:         run the websocket server first"));
        assert!(!text.contains("fee:"));
        assert!(text.contains("mode = online (string) [required]"));
        assert!(text.contains("recognition mode"));
        assert!(text.contains("choices: online, 2pass"));
        assert!(text.contains("default: 2pass"));
    }

    #[test]
    fn info_for_unselected_engine_omits_parameters() {
        let mut kws = funasr();
        kws.name = "kws".into();
        let mut ui = UiState::from_config(&AppConfig::default());
        ui.engines = vec![funasr(), kws];
        ui.engine = Some("funasr".into());
        ui.param_schema = ParamSchema::Ready(vec![mode_param()]);

        let text = format_engine_info(&ui, Some("kws")).unwrap();
        assert!(text.starts_with("kws"));
        assert!(text.contains("select the engine to load them"));
        assert!(!text.contains("mode ="));
    }

    #[test]
    fn info_errors() {
        let mut ui = UiState::from_config(&AppConfig::default());
        assert!(format_engine_info(&ui, None).is_err());
        ui.engines = vec![funasr()];
        assert!(format_engine_info(&ui, Some("whisper")).is_err());
    }
}
