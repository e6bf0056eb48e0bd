use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Stages sorted by position.
    pub fn ordered_stages(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.iter().collect();
        stages.sort_by_key(|stage| stage.position);
        stages
    }

    /// The stage new opportunities land in.
    pub fn first_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|stage| stage.position)
    }

    pub fn has_stage(&self, stage_id: &str) -> bool {
        self.stages.iter().any(|stage| stage.id == stage_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub monetary_value: f64,
    #[serde(default)]
    pub source: Option<String>,
    pub pipeline_id: String,
    pub pipeline_stage_id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub status: OpportunityStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    #[default]
    Open,
    Won,
    Lost,
    Abandoned,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOpportunityRequest {
    pub stage_id: Option<String>,
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineList {
    pub pipelines: Vec<Pipeline>,
}
