//! Create, edit and display lists.

use anyhow::{Context, Result};
use listsync_types::{GroceryList, Item, ListId};
use std::path::Path;

use super::{parse_item, print_list, Session};

/// Run the create command. Returns the new list id.
pub async fn create(data_dir: &Path, name: &str, items: &[String]) -> Result<ListId> {
    let items = items
        .iter()
        .map(|input| parse_item(input))
        .collect::<Result<Vec<Item>>>()?;

    let session = Session::open(data_dir).await?;
    let result = session.engine.create_list(name, items).await;
    session.close().await;
    let id = result.context("Failed to create list")?;

    println!("Created list {}", id);
    Ok(id)
}

/// Run the add command: insert an item, or replace the one with the same name.
pub async fn add(data_dir: &Path, list_id: &str, item: &str) -> Result<GroceryList> {
    let item = parse_item(item)?;
    let list_id = ListId::new(list_id);

    let session = Session::open(data_dir).await?;
    let result = async {
        let current = session.engine.get_list(&list_id).await?;
        match current.item(&item.name) {
            Some(old) => println!("Replacing {} (was x{})", old.name, old.qty),
            None => println!("Adding {}", item.name),
        }
        let mut items = current.items_without(&item.name);
        let position = current
            .items
            .iter()
            .position(|i| i.name == item.name)
            .unwrap_or(items.len());
        items.insert(position.min(items.len()), item);
        session
            .engine
            .update_list(&list_id, &current.name, items)
            .await
    }
    .await;
    session.close().await;
    let updated = result.context("Failed to update list")?;

    print_list(&updated);
    Ok(updated)
}

/// Run the remove command. Removing an absent item is not an error.
pub async fn remove(data_dir: &Path, list_id: &str, item_name: &str) -> Result<Vec<Item>> {
    let list_id = ListId::new(list_id);

    let session = Session::open(data_dir).await?;
    let result = async {
        let current = session.engine.get_list(&list_id).await?;
        session
            .engine
            .remove_item(&list_id, &current.name, item_name)
            .await
    }
    .await;
    session.close().await;
    let items = result.context("Failed to remove item")?;

    println!("{} item(s) left", items.len());
    Ok(items)
}

/// Run the lists command: owned lists, then anything shared with us.
///
/// With `watch`, keeps printing the owned set after every change until
/// interrupted.
pub async fn owned(data_dir: &Path, watch: bool) -> Result<Vec<GroceryList>> {
    let session = Session::open(data_dir).await?;
    let mut owned = match session.engine.fetch_owned_lists().await {
        Ok(owned) => owned,
        Err(e) => {
            session.close().await;
            return Err(e).context("Failed to fetch lists");
        }
    };

    let me = session.engine.public_key();
    print_all(&owned.initial);
    let shared: Vec<GroceryList> = session
        .engine
        .cached_lists()
        .into_iter()
        .filter(|l| l.owner != me)
        .collect();
    if !shared.is_empty() {
        println!();
        println!("Shared with you:");
        print_all(&shared);
    }

    if watch {
        println!();
        println!("Watching for changes (Ctrl-C to stop)...");
        loop {
            tokio::select! {
                update = owned.updates.next() => match update {
                    Some(lists) => {
                        println!();
                        print_all(&lists);
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    let initial = std::mem::take(&mut owned.initial);
    drop(owned);
    session.close().await;
    Ok(initial)
}

/// Run the show command for one list, optionally following it.
pub async fn show(data_dir: &Path, list_id: &str, watch: bool) -> Result<GroceryList> {
    let list_id = ListId::new(list_id);
    let session = Session::open(data_dir).await?;

    let list = match session.engine.get_list(&list_id).await {
        Ok(list) => list,
        Err(e) => {
            session.close().await;
            return Err(e).context("Failed to load list");
        }
    };
    print_list(&list);

    if watch {
        match session.engine.watch_list(&list_id).await {
            Ok(mut feed) => {
                println!();
                println!("Watching for changes (Ctrl-C to stop)...");
                loop {
                    tokio::select! {
                        update = feed.next() => match update {
                            Some(version) if version.updated_at > list.updated_at => {
                                println!();
                                print_list(&version);
                            }
                            Some(_) => {}
                            None => break,
                        },
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }
            Err(e) => println!("Cannot watch: {}", e),
        }
    }

    session.close().await;
    Ok(list)
}

fn print_all(lists: &[GroceryList]) {
    if lists.is_empty() {
        println!("No lists yet. Create one with: listsync create <name>");
    }
    for (i, list) in lists.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_list(list);
    }
}
