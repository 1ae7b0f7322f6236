use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use forgechain::{Block, BlockId, Transaction};

use super::{ApiError, blocking, internal};
use crate::state::SharedState;

/// Most blocks returned by one `GET /blocks`.
pub const MAX_BLOCKS_PER_PAGE: u64 = 100;

/// Query for `GET /blocks`. Indexes count back from the head: index 0 is
/// the head itself.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlocksQuery {
    pub first_index: Option<u64>,
    pub last_index: Option<u64>,
    pub include_transactions: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView {
    pub height: u64,
    pub id: BlockId,
    pub previous_block_id: BlockId,
    pub timestamp: u64,
    pub base_target: u64,
    pub cumulative_difficulty: String,
    pub number_of_transactions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
}

impl BlockView {
    fn new(block: Block, include_transactions: bool) -> Self {
        Self {
            height: block.height(),
            id: block.id(),
            previous_block_id: block.previous_block_id(),
            timestamp: block.timestamp(),
            base_target: block.base_target(),
            cumulative_difficulty: block.cumulative_difficulty().to_string(),
            number_of_transactions: block.transactions().len(),
            transactions: include_transactions.then(|| block.into_transactions()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlocksResponse {
    pub blocks: Vec<BlockView>,
}

/// Heights covered by `[first, last]` on a chain whose head is at
/// `head`, newest first. The page never exceeds [`MAX_BLOCKS_PER_PAGE`].
pub fn page_heights(head: u64, first: Option<u64>, last: Option<u64>) -> Vec<u64> {
    let first = first.unwrap_or(0);
    let max_last = first.saturating_add(MAX_BLOCKS_PER_PAGE - 1);
    let last = match last {
        Some(last) if last >= first && last <= max_last => last,
        _ => max_last,
    };
    if first > head {
        return Vec::new();
    }
    let lowest = head.saturating_sub(last);
    (lowest..=head - first).rev().collect()
}

/// `GET /blocks?firstIndex&lastIndex&includeTransactions`
pub async fn blocks(
    State(state): State<SharedState>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<BlocksResponse>, ApiError> {
    let ctx = state.ctx.clone();
    let blocks = blocking(move || {
        let chain = ctx.lock();
        page_heights(chain.height(), query.first_index, query.last_index)
            .into_iter()
            .filter_map(|h| chain.block_at(h).transpose())
            .map(|b| b.map(|b| BlockView::new(b, query.include_transactions)))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?
    .map_err(|e| internal(format!("failed to load blocks: {e}")))?;

    Ok(Json(BlocksResponse { blocks }))
}
