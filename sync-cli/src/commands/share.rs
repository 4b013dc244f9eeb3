//! Share a list with another key.

use anyhow::{Context, Result};
use listsync_types::ListId;
use std::path::Path;

use super::Session;

/// Run the share command. Returns whether a relay accepted the invite.
pub async fn run(data_dir: &Path, list_id: &str, recipient: &str) -> Result<bool> {
    let list_id = ListId::new(list_id);
    let session = Session::open(data_dir).await?;

    let result = async {
        let list = session.engine.get_list(&list_id).await?;
        session
            .engine
            .share_list(&list_id, &list.name, recipient)
            .await
    }
    .await;
    session.close().await;
    let shared = result.context("Failed to share list")?;

    if shared {
        println!("Invite sent.");
    } else {
        println!("Every relay rejected the invite. Try again later.");
    }
    Ok(shared)
}
