//
// session.rs
//
// Request dispatch over the project service, and cross-file diagnostics
//
// A session owns the project service and answers JSON requests of the
// form `{"seq", "type": "request", "command", "arguments"}`. Responses and
// events are pushed to an output channel as JSON values.
//

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config_file::CompilerOptions;
use crate::error::{OperationCanceled, ProjectServiceError};
use crate::host::{HostEvent, ServerHost};
use crate::multistep::{MultistepOperation, NextStep};
use crate::path::NormalizedPath;
use crate::project::{Project, ProjectId, ProjectKind};
use crate::script_info::{ScriptInfo, ScriptKind};
use crate::service::{ExternalProjectRequest, OpenFileRequest, ProjectService, TextEdit};
use crate::text::LineOffset;

/// Cannot find module.
const CANNOT_FIND_MODULE: u32 = 2307;
/// A closing bracket without an opener.
const UNEXPECTED_CLOSER: u32 = 1128;
/// An opener never closed.
const EXPECTED_CLOSER: u32 = 1005;

/// Longest pause between the files of one diagnostics request.
const MAX_FOLLOW_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub start: LineOffset,
    pub end: LineOffset,
    pub text: String,
    pub code: u32,
    pub category: &'static str,
}

/// The checker behind a session. Only diagnostics are routed through it;
/// everything else the session answers from the project service.
pub trait LanguageService: Send {
    fn syntactic_diagnostics(&self, info: &ScriptInfo) -> Vec<Diagnostic>;

    fn semantic_diagnostics(&self, project: &Project, info: &ScriptInfo) -> Vec<Diagnostic>;
}

/// Bracket balance for syntax and unresolved imports for semantics.
#[derive(Debug, Default)]
pub struct BasicLanguageService;

fn closer_of(opener: char) -> char {
    match opener {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Positions of unbalanced brackets, skipping strings and comments.
fn unbalanced_brackets(text: &str) -> (Vec<(usize, char)>, Vec<(usize, char)>) {
    let chars: Vec<char> = text.chars().collect();
    let mut open: Vec<(usize, char)> = Vec::new();
    let mut stray = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                continue;
            }
            '"' | '\'' | '`' => {
                i += 1;
                while i < chars.len() && chars[i] != c {
                    if chars[i] == '\\' {
                        i += 1;
                    } else if chars[i] == '\n' && c != '`' {
                        break;
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => open.push((i, c)),
            ')' | ']' | '}' => match open.last() {
                Some((_, opener)) if closer_of(*opener) == c => {
                    open.pop();
                }
                _ => stray.push((i, c)),
            },
            _ => {}
        }
        i += 1;
    }
    (open, stray)
}

impl LanguageService for BasicLanguageService {
    fn syntactic_diagnostics(&self, info: &ScriptInfo) -> Vec<Diagnostic> {
        let Some(text) = info.text() else {
            return Vec::new();
        };
        let (unclosed, stray) = unbalanced_brackets(&text);
        let end_of_file = info.position_to_line_offset(text.chars().count());
        let mut diagnostics: Vec<Diagnostic> = stray
            .into_iter()
            .map(|(position, c)| Diagnostic {
                start: info.position_to_line_offset(position),
                end: info.position_to_line_offset(position + 1),
                text: format!("Unexpected '{}'.", c),
                code: UNEXPECTED_CLOSER,
                category: "error",
            })
            .collect();
        diagnostics.extend(unclosed.into_iter().map(|(_, opener)| Diagnostic {
            start: end_of_file,
            end: end_of_file,
            text: format!("'{}' expected.", closer_of(opener)),
            code: EXPECTED_CLOSER,
            category: "error",
        }));
        diagnostics
    }

    fn semantic_diagnostics(&self, project: &Project, info: &ScriptInfo) -> Vec<Diagnostic> {
        project
            .unresolved_references(info.path())
            .iter()
            .map(|reference| Diagnostic {
                start: info.position_to_line_offset(reference.span.start),
                end: info.position_to_line_offset(reference.span.end()),
                text: format!(
                    "Cannot find module '{}' or its corresponding type declarations.",
                    reference.specifier
                ),
                code: CANNOT_FIND_MODULE,
                category: "error",
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for {command}: {source}")]
    InvalidArguments {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no project named {0}")]
    UnknownProject(String),

    #[error(transparent)]
    Service(#[from] ProjectServiceError),
}

#[derive(Debug, Deserialize)]
struct Request {
    seq: u64,
    command: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileArgs {
    file: String,
    #[serde(default)]
    project_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenArgs {
    file: String,
    #[serde(default)]
    file_content: Option<String>,
    #[serde(default)]
    script_kind_name: Option<String>,
    #[serde(default)]
    project_root_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeArgs {
    file: String,
    line: usize,
    offset: usize,
    end_line: usize,
    end_offset: usize,
    #[serde(default)]
    insert_string: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedFile {
    file_name: String,
    text_changes: Vec<TextEdit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateOpenArgs {
    #[serde(default)]
    open_files: Vec<OpenArgs>,
    #[serde(default)]
    changed_files: Vec<ChangedFile>,
    #[serde(default)]
    closed_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeterrArgs {
    files: Vec<String>,
    #[serde(default)]
    delay: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectInfoArgs {
    file: String,
    #[serde(default)]
    need_file_name_list: bool,
}

#[derive(Debug, Deserialize)]
struct ExternalProjectsArgs {
    projects: Vec<ExternalProjectRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseExternalArgs {
    project_file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferredOptionsArgs {
    options: CompilerOptions,
    #[serde(default)]
    project_root_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    seq: u64,
}

fn script_kind_from_name(name: Option<&str>) -> ScriptKind {
    match name {
        Some("TS") => ScriptKind::Ts,
        Some("TSX") => ScriptKind::Tsx,
        Some("JS") => ScriptKind::Js,
        Some("JSX") => ScriptKind::Jsx,
        _ => ScriptKind::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiagnosticPhase {
    Syntactic,
    Semantic,
}

/// Position of a `geterr` request in its file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticStep {
    files: Vec<NormalizedPath>,
    index: usize,
    phase: DiagnosticPhase,
    follow_delay: Duration,
}

pub struct Session {
    service: ProjectService,
    language_service: Box<dyn LanguageService>,
    diagnostics: MultistepOperation<DiagnosticStep>,
    output: UnboundedSender<Value>,
}

impl Session {
    pub fn new(
        mut service: ProjectService,
        language_service: Box<dyn LanguageService>,
        output: UnboundedSender<Value>,
    ) -> Self {
        let events = output.clone();
        service.set_event_handler(Box::new(move |event| match serde_json::to_value(&event) {
            Ok(Value::Object(mut body)) => {
                body.insert("seq".to_string(), json!(0));
                body.insert("type".to_string(), json!("event"));
                let _ = events.send(Value::Object(body));
            }
            Ok(_) => {}
            Err(e) => log::error!("Failed to serialize event {}: {}", event.name(), e),
        }));
        Self {
            service,
            language_service,
            diagnostics: MultistepOperation::new(),
            output,
        }
    }

    pub fn service(&self) -> &ProjectService {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut ProjectService {
        &mut self.service
    }

    fn host(&self) -> Arc<dyn ServerHost> {
        Arc::clone(self.service.host())
    }

    fn send(&self, message: Value) {
        if self.output.send(message).is_err() {
            log::warn!("Output channel closed, dropping message");
        }
    }

    fn event(&self, event: &str, body: Value) {
        self.send(json!({ "seq": 0, "type": "event", "event": event, "body": body }));
    }

    /// Handle one line of input.
    pub fn handle_message(&mut self, line: &str) {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Malformed request: {}", e);
                self.send(json!({
                    "seq": 0,
                    "type": "response",
                    "command": "unknown",
                    "request_seq": 0,
                    "success": false,
                    "message": format!("malformed request: {}", e),
                }));
                return;
            }
        };
        log::trace!("Request {} {}", request.seq, request.command);
        let response = match self.execute(request.seq, &request.command, request.arguments) {
            Ok(body) => json!({
                "seq": 0,
                "type": "response",
                "command": request.command,
                "request_seq": request.seq,
                "success": true,
                "body": body,
            }),
            Err(e) => {
                log::info!("Request {} {} failed: {}", request.seq, request.command, e);
                json!({
                    "seq": 0,
                    "type": "response",
                    "command": request.command,
                    "request_seq": request.seq,
                    "success": false,
                    "message": e.to_string(),
                })
            }
        };
        self.send(response);
    }

    fn execute(&mut self, seq: u64, command: &str, arguments: Value) -> Result<Value, SessionError> {
        fn args<T: serde::de::DeserializeOwned>(command: &str, arguments: Value) -> Result<T, SessionError> {
            serde_json::from_value(arguments).map_err(|source| SessionError::InvalidArguments {
                command: command.to_string(),
                source,
            })
        }

        match command {
            "open" => {
                let a: OpenArgs = args(command, arguments)?;
                let file = self.service.to_path(&a.file);
                let root = a.project_root_path.map(|root| self.service.to_path(&root));
                let kind = script_kind_from_name(a.script_kind_name.as_deref());
                let result = self.service.open_client_file(&file, a.file_content, kind, root)?;
                Ok(json!({
                    "configFileName": result.configured_project,
                    "configFileErrors": result.config_file_errors,
                }))
            }
            "close" => {
                let a: FileArgs = args(command, arguments)?;
                let file = self.service.to_path(&a.file);
                self.service.close_client_file(&file)?;
                Ok(Value::Null)
            }
            "change" => {
                let a: ChangeArgs = args(command, arguments)?;
                let file = self.service.to_path(&a.file);
                let edit = TextEdit {
                    start: LineOffset::new(a.line, a.offset),
                    end: LineOffset::new(a.end_line, a.end_offset),
                    new_text: a.insert_string,
                };
                self.service.change_open_file(&file, &[edit])?;
                Ok(Value::Null)
            }
            "updateOpen" => {
                let a: UpdateOpenArgs = args(command, arguments)?;
                let opens = a
                    .open_files
                    .into_iter()
                    .map(|open| OpenFileRequest {
                        file: self.service.to_path(&open.file),
                        content: open.file_content,
                        kind: script_kind_from_name(open.script_kind_name.as_deref()),
                        project_root: open.project_root_path.map(|root| self.service.to_path(&root)),
                    })
                    .collect();
                let changes = a
                    .changed_files
                    .into_iter()
                    .map(|changed| (self.service.to_path(&changed.file_name), changed.text_changes))
                    .collect();
                let closes = a.closed_files.iter().map(|file| self.service.to_path(file)).collect();
                self.service.apply_changes_in_open_files(opens, changes, closes)?;
                Ok(Value::Null)
            }
            "geterr" => {
                let a: GeterrArgs = args(command, arguments)?;
                self.start_diagnostics(seq, a);
                Ok(Value::Null)
            }
            "projectInfo" => {
                let a: ProjectInfoArgs = args(command, arguments)?;
                let file = self.service.to_path(&a.file);
                let id = self.service.ensure_default_project_for_file(&file)?;
                let info = self.service.project_info(id)?;
                let config_file_name = match info.kind {
                    ProjectKind::Configured | ProjectKind::External => info.name.clone(),
                    _ => String::new(),
                };
                let mut body = json!({
                    "configFileName": config_file_name,
                    "languageServiceDisabled": !info.language_service_enabled,
                });
                if a.need_file_name_list {
                    body["fileNames"] = json!(info.files);
                }
                Ok(body)
            }
            "reloadProjects" => {
                self.service.reload_projects();
                Ok(Value::Null)
            }
            "openExternalProject" => {
                let request: ExternalProjectRequest = args(command, arguments)?;
                self.service.open_external_project(request);
                Ok(Value::Null)
            }
            "openExternalProjects" => {
                let a: ExternalProjectsArgs = args(command, arguments)?;
                self.service.open_external_projects(a.projects);
                Ok(Value::Null)
            }
            "closeExternalProject" => {
                let a: CloseExternalArgs = args(command, arguments)?;
                self.service.close_external_project(&a.project_file_name);
                Ok(Value::Null)
            }
            "compilerOptionsForInferredProjects" => {
                let a: InferredOptionsArgs = args(command, arguments)?;
                let root = a.project_root_path.map(|root| self.service.to_path(&root));
                self.service
                    .set_compiler_options_for_inferred_projects(&a.options, root.as_ref());
                Ok(Value::Null)
            }
            "syntacticDiagnosticsSync" => {
                let a: FileArgs = args(command, arguments)?;
                let (_, file) = self.project_for_request(&a)?;
                let info = self
                    .service
                    .script_info(&file)
                    .ok_or_else(|| ProjectServiceError::ScriptInfoNotFound(file.clone()))?;
                Ok(json!(self.language_service.syntactic_diagnostics(info)))
            }
            "semanticDiagnosticsSync" => {
                let a: FileArgs = args(command, arguments)?;
                let (id, file) = self.project_for_request(&a)?;
                Ok(json!(self.semantic_diagnostics(id, &file)?))
            }
            "cancel" => {
                let a: CancelArgs = args(command, arguments)?;
                Ok(json!({ "canceled": self.diagnostics.cancel(a.seq) }))
            }
            _ => Err(SessionError::UnknownCommand(command.to_string())),
        }
    }

    /// Resolve the project a file request targets and bring it current.
    fn project_for_request(&mut self, args: &FileArgs) -> Result<(ProjectId, NormalizedPath), SessionError> {
        let file = self.service.to_path(&args.file);
        let id = match &args.project_file_name {
            Some(name) => {
                let id = self
                    .service
                    .projects()
                    .find(|project| project.name() == name.as_str())
                    .map(Project::id)
                    .ok_or_else(|| SessionError::UnknownProject(name.clone()))?;
                self.service.update_project_graph(id)?;
                id
            }
            None => self.service.ensure_default_project_for_file(&file)?,
        };
        let key = file.to_canonical(self.service.host().use_case_sensitive_file_names());
        let contained = self.service.project(id).is_some_and(|p| p.contains_file(&key));
        if !contained {
            let project = self.service.project(id).map(|p| p.name().to_string()).unwrap_or_default();
            return Err(ProjectServiceError::ProjectDoesNotContainDocument { project, file }.into());
        }
        Ok((id, file))
    }

    fn semantic_diagnostics(&self, id: ProjectId, file: &NormalizedPath) -> Result<Vec<Diagnostic>, ProjectServiceError> {
        let project = self.service.project(id).ok_or(ProjectServiceError::ProjectNotFound(id))?;
        if !project.language_service_enabled() {
            return Err(ProjectServiceError::LanguageServiceDisabled(project.name().to_string()));
        }
        let info = self
            .service
            .script_info(file)
            .ok_or_else(|| ProjectServiceError::ScriptInfoNotFound(file.clone()))?;
        Ok(self.language_service.semantic_diagnostics(project, info))
    }

    fn start_diagnostics(&mut self, seq: u64, args: GeterrArgs) {
        let files: Vec<NormalizedPath> = args.files.iter().map(|file| self.service.to_path(file)).collect();
        if files.is_empty() {
            self.event("requestCompleted", json!({ "request_seq": seq }));
            return;
        }
        let delay = Duration::from_millis(args.delay);
        let step = DiagnosticStep {
            files,
            index: 0,
            phase: DiagnosticPhase::Syntactic,
            follow_delay: delay.min(MAX_FOLLOW_DELAY),
        };
        let host = self.host();
        if let Some(superseded) = self.diagnostics.start_new(&*host, seq, NextStep::Delay(delay, step)) {
            self.event("requestCompleted", json!({ "request_seq": superseded }));
        }
    }

    /// Run one diagnostics step. Files that are closed or have no project
    /// by the time their turn comes are skipped.
    fn run_diagnostic_step(
        &mut self,
        step: DiagnosticStep,
        token: &CancellationToken,
    ) -> Result<NextStep<DiagnosticStep>, OperationCanceled> {
        if token.is_cancelled() {
            return Err(OperationCanceled);
        }
        let file = step.files[step.index].clone();
        let next_file = || {
            if step.index + 1 < step.files.len() {
                NextStep::Delay(
                    step.follow_delay,
                    DiagnosticStep {
                        index: step.index + 1,
                        phase: DiagnosticPhase::Syntactic,
                        ..step.clone()
                    },
                )
            } else {
                NextStep::Done
            }
        };
        if !self.service.is_open(&file) {
            return Ok(next_file());
        }
        let id = match self.service.ensure_default_project_for_file(&file) {
            Ok(id) => id,
            Err(e) => {
                log::trace!("Skipping diagnostics of {}: {}", file, e);
                return Ok(next_file());
            }
        };

        match step.phase {
            DiagnosticPhase::Syntactic => {
                let diagnostics = self
                    .service
                    .script_info(&file)
                    .map(|info| self.language_service.syntactic_diagnostics(info))
                    .unwrap_or_default();
                self.event("syntaxDiag", json!({ "file": file, "diagnostics": diagnostics }));
                Ok(NextStep::Immediate(DiagnosticStep {
                    phase: DiagnosticPhase::Semantic,
                    ..step.clone()
                }))
            }
            DiagnosticPhase::Semantic => {
                let diagnostics = self.semantic_diagnostics(id, &file).unwrap_or_default();
                self.event("semanticDiag", json!({ "file": file, "diagnostics": diagnostics }));
                Ok(next_file())
            }
        }
    }

    fn execute_step(&mut self, step: DiagnosticStep, token: CancellationToken) {
        let host = self.host();
        let next = match self.run_diagnostic_step(step, &token) {
            Ok(next) => next,
            Err(OperationCanceled) => {
                log::trace!("Diagnostics request canceled");
                NextStep::Done
            }
        };
        if let Some(finished) = self.diagnostics.advance(&*host, next) {
            self.event("requestCompleted", json!({ "request_seq": finished }));
        }
    }

    /// Dispatch a host callback to the diagnostics operation or the
    /// project service.
    pub fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Watch(event) => self.service.on_watch_event(event),
            HostEvent::Timer(timer) => {
                if let Some((step, token)) = self.diagnostics.on_timer(timer) {
                    self.execute_step(step, token);
                } else if !self.service.on_timer(timer) {
                    log::trace!("Ignoring stale timer {:?}", timer);
                }
            }
        }
    }

    pub fn has_immediate(&self) -> bool {
        self.diagnostics.has_immediate()
    }

    /// Run the waiting immediate step, if any. Returns whether one ran.
    pub fn run_immediate(&mut self) -> bool {
        match self.diagnostics.take_ready() {
            Some((step, token)) => {
                self.execute_step(step, token);
                true
            }
            None => false,
        }
    }
}
