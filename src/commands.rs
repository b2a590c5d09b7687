//! Command-line front end over the cache interceptor and the catalog.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::cache::{
  CacheInterceptor, CacheStorage, HttpNetwork, Lifecycle, Network, Request, ResponseSource,
  SqliteCacheStorage,
};
use crate::config::{BackendKind, Config};
use crate::db::Database;
use crate::store::{
  seed, Catalog, Group, Item, ItemDraft, ItemPatch, Listing, LocalBackend, Pending, RemoteBackend,
};

/// How often to reconcile background work while waiting for a load
const TICK: Duration = Duration::from_millis(25);

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Install and activate the configured cache generation
  Install,
  /// Fetch a URL through the offline cache
  Fetch {
    /// Absolute URL, or a path resolved against the configured origin
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Show what the viewer displays: each category tab and its active announcements
  View {
    /// Only show this category
    #[arg(long)]
    group: Option<String>,
  },
  /// Manage categories
  #[command(subcommand)]
  Groups(GroupCommand),
  /// Manage announcements
  #[command(subcommand)]
  Items(ItemCommand),
  /// Fill an empty store with the stock categories and announcements
  Seed,
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
  List,
  Add {
    label: String,
  },
  Rename {
    id: String,
    label: String,
  },
  Delete {
    id: String,
  },
  /// Reorder categories; ids not listed keep their slots
  Reorder {
    #[arg(required = true)]
    ids: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
pub enum ItemCommand {
  List {
    /// Only list announcements of this category
    #[arg(long)]
    group: Option<String>,
  },
  Add {
    #[arg(long)]
    group: String,
    #[arg(long)]
    title: String,
    /// Content fragment (plain text or markup); repeat for several
    #[arg(long)]
    content: Vec<String>,
    /// Create the announcement hidden from the viewer
    #[arg(long)]
    inactive: bool,
  },
  Update {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    group: Option<String>,
    /// Replace the content; repeat for several fragments
    #[arg(long)]
    content: Vec<String>,
    #[arg(long)]
    active: Option<bool>,
  },
  Delete {
    id: String,
  },
  /// Reorder announcements, optionally within one category's filtered view
  Reorder {
    #[arg(long)]
    group: Option<String>,
    #[arg(required = true)]
    ids: Vec<String>,
  },
  /// Drag an announcement onto another one
  Move {
    dragged: String,
    target: String,
  },
}

pub async fn run(command: Command, config: &Config) -> Result<()> {
  match command {
    Command::Install => install(config).await,
    Command::Fetch {
      url,
      navigate,
      method,
    } => fetch(config, &url, navigate, method).await,
    Command::View { group } => {
      let catalog = open_catalog(config).await?;
      view(&catalog, group.as_deref())
    }
    Command::Groups(cmd) => {
      let mut catalog = open_catalog(config).await?;
      groups(&mut catalog, cmd).await
    }
    Command::Items(cmd) => {
      let mut catalog = open_catalog(config).await?;
      items(&mut catalog, cmd).await
    }
    Command::Seed => {
      let mut catalog = open_catalog(config).await?;
      seed_catalog(&mut catalog).await
    }
  }
}

// ============================================================================
// Cache
// ============================================================================

type Interceptor = CacheInterceptor<SqliteCacheStorage, HttpNetwork>;

fn cache_parts(config: &Config) -> Result<(Arc<SqliteCacheStorage>, Arc<HttpNetwork>, Url)> {
  let storage = SqliteCacheStorage::new(Database::open(None)?.into_connection());
  let network = HttpNetwork::new(config.cache.timeout())?;
  Ok((Arc::new(storage), Arc::new(network), config.cache.origin_url()?))
}

async fn install(config: &Config) -> Result<()> {
  let (storage, network, origin) = cache_parts(config)?;
  let mut interceptor = Interceptor::new(
    storage,
    network,
    origin,
    &config.cache.generation,
    config.cache.precache.clone(),
  );

  interceptor.install().await?;
  let evicted = interceptor.activate()?;

  println!("activated {}", interceptor.generation());
  for name in evicted {
    println!("evicted {}", name);
  }
  Ok(())
}

/// Build the interceptor for the configured generation.
async fn interceptor(config: &Config) -> Result<Interceptor> {
  let (storage, network, origin) = cache_parts(config)?;
  select_generation(
    storage,
    network,
    origin,
    &config.cache.generation,
    config.cache.precache.clone(),
  )
  .await
}

/// Pick the generation that serves this run.
///
/// A generation installed by an earlier run is resumed. Otherwise it is
/// installed now; if that fails, the newest previous generation keeps
/// serving, and without one requests pass straight through.
async fn select_generation<S, N>(
  storage: Arc<S>,
  network: Arc<N>,
  origin: Url,
  generation: &str,
  precache: Vec<String>,
) -> Result<CacheInterceptor<S, N>>
where
  S: CacheStorage + 'static,
  N: Network,
{
  let existing = storage.keys()?;

  if existing.iter().any(|key| key == generation) {
    return CacheInterceptor::resume(storage, network, origin, generation);
  }

  let mut interceptor = CacheInterceptor::new(
    Arc::clone(&storage),
    Arc::clone(&network),
    origin.clone(),
    generation,
    precache,
  );
  match interceptor.install().await {
    Ok(()) => {
      interceptor.activate()?;
      Ok(interceptor)
    }
    Err(e) => match existing.last() {
      Some(previous) => {
        warn!(error = %e, previous = %previous, "install failed, staying on previous generation");
        CacheInterceptor::resume(storage, network, origin, previous)
      }
      None => {
        warn!(error = %e, "install failed and no previous generation exists");
        Ok(interceptor)
      }
    },
  }
}

async fn fetch(config: &Config, target: &str, navigate: bool, method: String) -> Result<()> {
  let interceptor = interceptor(config).await?;
  if interceptor.state() != Lifecycle::Activated {
    eprintln!("warning: no cache generation active, requests are not intercepted");
  }

  let url = match Url::parse(target) {
    Ok(url) => url,
    Err(_) => config
      .cache
      .origin_url()?
      .join(target)
      .map_err(|e| eyre!("Invalid URL {}: {}", target, e))?,
  };
  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  request.method = method;

  let served = interceptor.handle(&request).await?;
  interceptor.flush().await;

  let source = match served.source {
    ResponseSource::Network => "network",
    ResponseSource::Cache => "cache",
    ResponseSource::Shell => "cached shell",
    ResponseSource::Offline => "offline",
    ResponseSource::Passthrough => "passthrough",
  };
  let content_type = served.response.header("content-type").unwrap_or("unknown");
  info!(url = %request.url, status = served.response.status, source, content_type, "fetched");
  eprintln!("{} ({})", served.response.status, source);
  println!("{}", String::from_utf8_lossy(&served.response.body));
  Ok(())
}

// ============================================================================
// Catalog
// ============================================================================

async fn open_catalog(config: &Config) -> Result<Catalog> {
  let mut catalog = match config.backend.kind {
    BackendKind::Local => {
      let db = Database::open(config.backend.path.as_deref())?;
      let backend = Arc::new(LocalBackend::new(db.into_connection()));
      Catalog::new(backend.clone(), backend)
    }
    BackendKind::Remote => {
      let url = config
        .backend
        .url
        .as_deref()
        .ok_or_else(|| eyre!("backend.url is required for the remote backend"))?;
      let backend = Arc::new(RemoteBackend::new(
        url,
        Config::get_api_key()?,
        config.backend.timeout(),
      )?);
      Catalog::new(backend.clone(), backend)
    }
  };

  wait_loaded(&mut catalog).await?;
  Ok(catalog)
}

/// Poll both collections on a tick until they are loaded.
async fn wait_loaded(catalog: &mut Catalog) -> Result<()> {
  catalog.load();
  let mut tick = tokio::time::interval(TICK);

  loop {
    tick.tick().await;
    catalog.poll();

    if let Listing::Failed(message) = catalog.groups().list() {
      return Err(eyre!("Failed to load categories: {}", message));
    }
    if let Listing::Failed(message) = catalog.items().list() {
      return Err(eyre!("Failed to load announcements: {}", message));
    }
    if catalog.groups().is_loaded() && catalog.items().is_loaded() {
      return Ok(());
    }
  }
}

/// Wait for the write behind `pending` and surface its outcome.
async fn finish(catalog: &mut Catalog, pending: Pending) -> Result<()> {
  catalog.settle().await;
  pending.outcome().await?;
  Ok(())
}

fn view(catalog: &Catalog, only: Option<&str>) -> Result<()> {
  for group in catalog.tabs()? {
    if only.is_some_and(|id| id != group.id) {
      continue;
    }

    println!("== {}", group.label);
    let visible = catalog.visible_items(&group.id)?;
    if visible.is_empty() {
      println!("   No active announcements in this category.");
    }
    for item in visible {
      println!("   {}", item.title);
      for fragment in &item.content {
        println!("     {}", fragment);
      }
    }
  }
  Ok(())
}

async fn groups(catalog: &mut Catalog, cmd: GroupCommand) -> Result<()> {
  let pending = match cmd {
    GroupCommand::List => {
      for group in catalog.tabs()? {
        print_group(group);
      }
      return Ok(());
    }
    GroupCommand::Add { label } => {
      let (id, pending) = catalog.add_group(&label)?;
      println!("{}", id);
      pending
    }
    GroupCommand::Rename { id, label } => catalog.rename_group(&id, &label)?,
    GroupCommand::Delete { id } => catalog.delete_group(&id)?,
    GroupCommand::Reorder { ids } => catalog.reorder_groups(&ids)?,
  };

  finish(catalog, pending).await
}

async fn items(catalog: &mut Catalog, cmd: ItemCommand) -> Result<()> {
  let pending = match cmd {
    ItemCommand::List { group } => {
      let listed: Vec<&Item> = match &group {
        Some(group) => catalog.items_in_group(group)?,
        None => catalog.items().records().unwrap_or_default().iter().collect(),
      };
      for item in listed {
        print_item(item);
      }
      return Ok(());
    }
    ItemCommand::Add {
      group,
      title,
      content,
      inactive,
    } => {
      let (id, pending) = catalog.add_item(ItemDraft {
        title,
        group_id: group,
        content,
        active: !inactive,
      })?;
      println!("{}", id);
      pending
    }
    ItemCommand::Update {
      id,
      title,
      group,
      content,
      active,
    } => {
      let patch = ItemPatch {
        title,
        content: (!content.is_empty()).then_some(content),
        group_id: group,
        active,
      };
      catalog.update_item(&id, patch)?
    }
    ItemCommand::Delete { id } => catalog.delete_item(&id)?,
    ItemCommand::Reorder { group, ids } => match group {
      Some(group) => catalog.reorder_group_items(&group, &ids)?,
      None => catalog.reorder_items(&ids)?,
    },
    ItemCommand::Move { dragged, target } => catalog.move_item(&dragged, &target)?,
  };

  finish(catalog, pending).await
}

async fn seed_catalog(catalog: &mut Catalog) -> Result<()> {
  let has_groups = !catalog.groups().records().unwrap_or_default().is_empty();
  let has_items = !catalog.items().records().unwrap_or_default().is_empty();
  if has_groups || has_items {
    return Err(eyre!("The store already has data; seeding only fills an empty store"));
  }

  let mut pending = Vec::new();
  for group in seed::groups() {
    pending.push(catalog.groups().create(group)?);
  }
  for item in seed::items() {
    pending.push(catalog.items().create(item)?);
  }

  catalog.settle().await;
  for write in pending {
    write.outcome().await?;
  }

  let groups = catalog.groups().records().map_or(0, <[Group]>::len);
  let items = catalog.items().records().map_or(0, <[Item]>::len);
  println!("seeded {} categories and {} announcements", groups, items);
  Ok(())
}

fn print_group(group: &Group) {
  println!("{:>3}  {:<16} {}", group.order, group.id, group.label);
}

fn print_item(item: &Item) {
  let hidden = if item.active { "" } else { "  (inactive)" };
  println!(
    "{:>3}  {}  [{}] {}{}",
    item.order, item.id, item.group_id, item.title, hidden
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Response;
  use crate::store::testing::{Call, MemoryBackend};
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  const ORIGIN: &str = "https://gate.example";

  /// Answers every request with `200`, or fails everything while offline.
  #[derive(Default)]
  struct ShellNetwork {
    offline: AtomicBool,
    fetches: AtomicUsize,
  }

  #[async_trait]
  impl Network for ShellNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }
      Ok(Response::new(200, vec![], format!("body of {}", request.url.path())))
    }
  }

  fn storage() -> Arc<SqliteCacheStorage> {
    Arc::new(SqliteCacheStorage::new(
      Database::open_in_memory().unwrap().into_connection(),
    ))
  }

  fn network(offline: bool) -> Arc<ShellNetwork> {
    let network = ShellNetwork::default();
    network.offline.store(offline, Ordering::SeqCst);
    Arc::new(network)
  }

  async fn select(
    storage: &Arc<SqliteCacheStorage>,
    network: &Arc<ShellNetwork>,
    generation: &str,
  ) -> CacheInterceptor<SqliteCacheStorage, ShellNetwork> {
    select_generation(
      storage.clone(),
      network.clone(),
      Url::parse(ORIGIN).unwrap(),
      generation,
      vec!["/".to_string(), "/icon.svg".to_string()],
    )
    .await
    .unwrap()
  }

  #[tokio::test]
  async fn test_missing_generation_is_installed_and_activated() {
    let storage = storage();
    storage.open("v1").unwrap();
    let network = network(false);

    let interceptor = select(&storage, &network, "v2").await;
    assert_eq!(interceptor.state(), Lifecycle::Activated);
    assert_eq!(interceptor.generation(), "v2");
    assert_eq!(storage.keys().unwrap(), vec!["v2"]);
  }

  #[tokio::test]
  async fn test_installed_generation_is_resumed_without_fetching() {
    let storage = storage();
    storage.open("v2").unwrap();
    let network = network(false);

    let interceptor = select(&storage, &network, "v2").await;
    assert_eq!(interceptor.state(), Lifecycle::Activated);
    assert_eq!(interceptor.generation(), "v2");
    assert_eq!(network.fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_failed_install_stays_on_newest_previous_generation() {
    let storage = storage();
    storage.open("v0").unwrap();
    storage.open("v1").unwrap();
    let network = network(true);

    let interceptor = select(&storage, &network, "v2").await;
    assert_eq!(interceptor.state(), Lifecycle::Activated);
    assert_eq!(interceptor.generation(), "v1");
    assert_eq!(storage.keys().unwrap(), vec!["v0", "v1"]);
  }

  #[tokio::test]
  async fn test_failed_install_without_previous_generation_passes_through() {
    let storage = storage();
    let network = network(true);

    let interceptor = select(&storage, &network, "v2").await;
    assert_eq!(interceptor.state(), Lifecycle::Redundant);
    assert!(storage.keys().unwrap().is_empty());
  }

  fn catalog(groups: &Arc<MemoryBackend<Group>>, items: &Arc<MemoryBackend<Item>>) -> Catalog {
    Catalog::new(groups.clone(), items.clone())
  }

  #[tokio::test]
  async fn test_seed_fills_empty_store() {
    let groups = Arc::new(MemoryBackend::with_records(Vec::new()));
    let items = Arc::new(MemoryBackend::with_records(Vec::new()));
    let mut catalog = catalog(&groups, &items);
    wait_loaded(&mut catalog).await.unwrap();

    seed_catalog(&mut catalog).await.unwrap();

    let stored: Vec<String> = groups.snapshot().into_iter().map(|g| g.id).collect();
    let stock: Vec<String> = seed::groups().into_iter().map(|g| g.id).collect();
    assert_eq!(stored, stock);
    assert_eq!(items.snapshot().len(), seed::items().len());
  }

  #[tokio::test]
  async fn test_seed_refuses_store_with_data() {
    let groups = Arc::new(MemoryBackend::with_records(vec![Group::from_label("Boarding", 0)]));
    let items = Arc::new(MemoryBackend::with_records(Vec::new()));
    let mut catalog = catalog(&groups, &items);
    wait_loaded(&mut catalog).await.unwrap();

    assert!(seed_catalog(&mut catalog).await.is_err());
    assert!(!groups.calls().iter().any(|call| matches!(call, Call::Insert(_))));
    assert!(!items.calls().iter().any(|call| matches!(call, Call::Insert(_))));
  }

  #[tokio::test]
  async fn test_wait_loaded_reports_load_failure() {
    let groups = Arc::new(MemoryBackend::with_records(Vec::new()));
    let items = Arc::new(MemoryBackend::<Item>::with_records(Vec::new()));
    items.fail_if(|call| matches!(call, Call::List));
    let mut catalog = catalog(&groups, &items);

    let err = wait_loaded(&mut catalog).await.unwrap_err();
    assert!(err.to_string().contains("Failed to load announcements"));
  }
}
