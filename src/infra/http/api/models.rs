use serde::Deserialize;

use vellum_api_types::{RenderListResponse, RenderResponse};

use crate::domain::renders::{OutputLayout, RenderRecord};

/// Document reference carried in the query string.
#[derive(Debug, Deserialize)]
pub struct RenderSourceQuery {
    pub source_type: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenderListQuery {
    pub state: Option<String>,
    pub source_type: Option<String>,
    pub limit: Option<u32>,
}

pub fn render_response(record: RenderRecord, layout: &OutputLayout) -> RenderResponse {
    let output_url = record.output_url(layout);
    RenderResponse {
        id: record.id,
        source_type: record.source_type,
        source_id: record.source_id,
        created_at: record.created_at,
        state: record.state,
        output_url,
        logs: record.logs,
    }
}

pub fn render_list_response(records: Vec<RenderRecord>, layout: &OutputLayout) -> RenderListResponse {
    RenderListResponse {
        items: records
            .into_iter()
            .map(|record| render_response(record, layout))
            .collect(),
    }
}
