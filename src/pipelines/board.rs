//! Stage columns and dashboard totals computed from opportunity membership.
//!
//! Nothing here is stored: counts and totals are derived each time from
//! which stage every opportunity points at. Records the CRM returns with a
//! stage that no longer exists are kept aside as unassigned rather than
//! failing the whole board.

use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::{Opportunity, OpportunityStatus, Pipeline, Stage};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoardError {
    #[error("Unknown stage {0}")]
    UnknownStage(String),
    #[error("Unknown opportunity {0}")]
    UnknownOpportunity(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageColumn {
    pub stage: Stage,
    pub count: usize,
    pub total_value: f64,
    pub opportunity_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineBoard {
    pipeline: Pipeline,
    opportunities: Vec<Opportunity>,
    unassigned: Vec<Opportunity>,
}

impl PipelineBoard {
    /// Sorts opportunities into stage columns. Ones pointing at a stage the
    /// pipeline no longer has go to [`Self::unassigned`]; ones from another
    /// pipeline are dropped.
    pub fn build(pipeline: Pipeline, opportunities: Vec<Opportunity>) -> Self {
        let mut assigned = Vec::with_capacity(opportunities.len());
        let mut unassigned = Vec::new();

        for opportunity in opportunities {
            if opportunity.pipeline_id != pipeline.id {
                warn!(
                    "Skipping opportunity {} of pipeline {} on board {}",
                    opportunity.id, opportunity.pipeline_id, pipeline.id
                );
            } else if pipeline.has_stage(&opportunity.pipeline_stage_id) {
                assigned.push(opportunity);
            } else {
                warn!(
                    "Opportunity {} points at unknown stage {} of pipeline {}",
                    opportunity.id, opportunity.pipeline_stage_id, pipeline.id
                );
                unassigned.push(opportunity);
            }
        }

        Self {
            pipeline,
            opportunities: assigned,
            unassigned,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn opportunities(&self) -> &[Opportunity] {
        &self.opportunities
    }

    pub fn unassigned(&self) -> &[Opportunity] {
        &self.unassigned
    }

    pub fn contains(&self, opportunity_id: &str) -> bool {
        self.opportunities
            .iter()
            .chain(&self.unassigned)
            .any(|o| o.id == opportunity_id)
    }

    pub fn columns(&self) -> Vec<StageColumn> {
        self.pipeline
            .ordered_stages()
            .into_iter()
            .map(|stage| {
                let members: Vec<&Opportunity> = self
                    .opportunities
                    .iter()
                    .filter(|o| o.pipeline_stage_id == stage.id)
                    .collect();
                StageColumn {
                    stage: stage.clone(),
                    count: members.len(),
                    total_value: members.iter().map(|o| o.monetary_value).sum(),
                    opportunity_ids: members.iter().map(|o| o.id.clone()).collect(),
                }
            })
            .collect()
    }

    /// Points the opportunity at `stage_id`. The previous stage loses it in
    /// the same step since membership is the only source of truth. An
    /// unassigned opportunity joins the board once it has a valid stage.
    pub fn move_opportunity(
        &mut self,
        opportunity_id: &str,
        stage_id: &str,
    ) -> Result<(), BoardError> {
        if !self.pipeline.has_stage(stage_id) {
            return Err(BoardError::UnknownStage(stage_id.to_string()));
        }

        if let Some(index) = self.unassigned.iter().position(|o| o.id == opportunity_id) {
            let opportunity = self.unassigned.remove(index);
            self.opportunities.push(opportunity);
        }

        let opportunity = self
            .opportunities
            .iter_mut()
            .find(|o| o.id == opportunity_id)
            .ok_or_else(|| BoardError::UnknownOpportunity(opportunity_id.to_string()))?;
        opportunity.pipeline_stage_id = stage_id.to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub pipeline_count: usize,
    pub open_opportunities: usize,
    pub won_opportunities: usize,
    pub open_value: f64,
    pub won_value: f64,
    pub value_by_source: BTreeMap<String, f64>,
}

pub fn summarize(boards: &[PipelineBoard]) -> DashboardSummary {
    let mut summary = DashboardSummary {
        pipeline_count: boards.len(),
        ..Default::default()
    };

    let all = boards
        .iter()
        .flat_map(|b| b.opportunities().iter().chain(b.unassigned()));
    for opportunity in all {
        match opportunity.status {
            OpportunityStatus::Open => {
                summary.open_opportunities += 1;
                summary.open_value += opportunity.monetary_value;
            }
            OpportunityStatus::Won => {
                summary.won_opportunities += 1;
                summary.won_value += opportunity.monetary_value;
            }
            OpportunityStatus::Lost | OpportunityStatus::Abandoned => continue,
        }
        let source = opportunity
            .source
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        *summary.value_by_source.entry(source).or_insert(0.0) += opportunity.monetary_value;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline {
            id: "p1".to_string(),
            name: "Sales".to_string(),
            stages: vec![
                Stage { id: "s2".to_string(), name: "Qualified".to_string(), position: 1 },
                Stage { id: "s1".to_string(), name: "New".to_string(), position: 0 },
            ],
        }
    }

    fn opportunity(id: &str, stage: &str, value: f64) -> Opportunity {
        Opportunity {
            id: id.to_string(),
            name: format!("Deal {id}"),
            monetary_value: value,
            source: Some("web".to_string()),
            pipeline_id: "p1".to_string(),
            pipeline_stage_id: stage.to_string(),
            contact_id: None,
            status: OpportunityStatus::Open,
        }
    }

    #[test]
    fn test_columns_follow_stage_position() {
        let board = PipelineBoard::build(
            pipeline(),
            vec![opportunity("o1", "s1", 100.0), opportunity("o2", "s1", 50.0)],
        );

        let columns = board.columns();
        assert_eq!(columns[0].stage.id, "s1");
        assert_eq!(columns[0].count, 2);
        assert_eq!(columns[0].total_value, 150.0);
        assert_eq!(columns[1].count, 0);
    }

    #[test]
    fn test_move_recomputes_both_columns() {
        let mut board = PipelineBoard::build(
            pipeline(),
            vec![opportunity("o1", "s1", 100.0), opportunity("o2", "s1", 50.0)],
        );

        board.move_opportunity("o1", "s2").unwrap();

        let columns = board.columns();
        assert_eq!((columns[0].count, columns[0].total_value), (1, 50.0));
        assert_eq!((columns[1].count, columns[1].total_value), (1, 100.0));
        let total: usize = columns.iter().map(|c| c.count).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_move_to_unknown_stage_is_rejected() {
        let mut board = PipelineBoard::build(pipeline(), vec![opportunity("o1", "s1", 1.0)]);
        assert_eq!(
            board.move_opportunity("o1", "nope"),
            Err(BoardError::UnknownStage("nope".to_string()))
        );
        assert_eq!(board.columns()[0].count, 1);
    }

    #[test]
    fn test_build_skips_foreign_pipeline() {
        let mut foreign = opportunity("o9", "s1", 1.0);
        foreign.pipeline_id = "p2".to_string();
        let board = PipelineBoard::build(pipeline(), vec![foreign, opportunity("o1", "s1", 5.0)]);

        assert_eq!(board.opportunities().len(), 1);
        assert!(board.unassigned().is_empty());
        assert!(!board.contains("o9"));
    }

    #[test]
    fn test_deleted_stage_goes_to_unassigned() {
        let board = PipelineBoard::build(
            pipeline(),
            vec![opportunity("o1", "s1", 100.0), opportunity("o2", "gone", 40.0)],
        );

        let counted: usize = board.columns().iter().map(|c| c.count).sum();
        assert_eq!(counted, 1);
        assert_eq!(board.unassigned()[0].id, "o2");
        assert!(board.contains("o2"));

        let summary = summarize(&[board]);
        assert_eq!(summary.open_opportunities, 2);
        assert_eq!(summary.open_value, 140.0);
    }

    #[test]
    fn test_moving_unassigned_places_it_on_the_board() {
        let mut board = PipelineBoard::build(pipeline(), vec![opportunity("o2", "gone", 40.0)]);

        board.move_opportunity("o2", "s2").unwrap();

        assert!(board.unassigned().is_empty());
        let columns = board.columns();
        assert_eq!((columns[1].count, columns[1].total_value), (1, 40.0));
    }

    #[test]
    fn test_summary_splits_open_and_won() {
        let mut won = opportunity("o3", "s2", 300.0);
        won.status = OpportunityStatus::Won;
        let mut lost = opportunity("o4", "s2", 999.0);
        lost.status = OpportunityStatus::Lost;

        let board = PipelineBoard::build(
            pipeline(),
            vec![opportunity("o1", "s1", 100.0), won, lost],
        );
        let summary = summarize(&[board]);

        assert_eq!(summary.open_opportunities, 1);
        assert_eq!(summary.won_value, 300.0);
        assert_eq!(summary.value_by_source["web"], 400.0);
    }

    #[test]
    fn test_first_stage_is_position_zero() {
        assert_eq!(pipeline().first_stage().unwrap().id, "s1");
    }
}
