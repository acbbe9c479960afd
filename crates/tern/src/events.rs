//
// events.rs
//
// Notifications the project service sends to its owner
//

use serde::Serialize;

use crate::config_file::ConfigDiagnostic;
use crate::path::NormalizedPath;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProjectServiceEvent {
    ProjectLoadingStart {
        project_name: String,
        reason: String,
    },
    ProjectLoadingFinish {
        project_name: String,
    },
    /// A project switched between full and syntax-only mode.
    ProjectLanguageServiceState {
        project_name: String,
        language_service_enabled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_file_exceeding_size_limit: Option<NormalizedPath>,
    },
    ConfigFileDiag {
        trigger_file: NormalizedPath,
        config_file: NormalizedPath,
        diagnostics: Vec<ConfigDiagnostic>,
    },
    LargeFileReferenced {
        file: NormalizedPath,
        file_size: u64,
        max_file_size: u64,
    },
    ProjectsUpdatedInBackground {
        open_files: Vec<NormalizedPath>,
    },
}

impl ProjectServiceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectServiceEvent::ProjectLoadingStart { .. } => "projectLoadingStart",
            ProjectServiceEvent::ProjectLoadingFinish { .. } => "projectLoadingFinish",
            ProjectServiceEvent::ProjectLanguageServiceState { .. } => "projectLanguageServiceState",
            ProjectServiceEvent::ConfigFileDiag { .. } => "configFileDiag",
            ProjectServiceEvent::LargeFileReferenced { .. } => "largeFileReferenced",
            ProjectServiceEvent::ProjectsUpdatedInBackground { .. } => "projectsUpdatedInBackground",
        }
    }
}

pub type EventHandler = Box<dyn FnMut(ProjectServiceEvent) + Send>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = ProjectServiceEvent::LargeFileReferenced {
            file: NormalizedPath::from_absolute("/p/big.js"),
            file_size: 10,
            max_file_size: 5,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "largeFileReferenced",
                "body": { "file": "/p/big.js", "fileSize": 10, "maxFileSize": 5 }
            })
        );
        assert_eq!(event.name(), "largeFileReferenced");
    }

    #[test]
    fn test_optional_fields_skipped() {
        let event = ProjectServiceEvent::ProjectLanguageServiceState {
            project_name: "/p/tsconfig.json".to_string(),
            language_service_enabled: true,
            last_file_exceeding_size_limit: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value["body"],
            json!({ "projectName": "/p/tsconfig.json", "languageServiceEnabled": true })
        );
    }
}
