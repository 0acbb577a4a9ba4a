use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, debug, info, warn};

use assetdex::config::AppPaths;
use assetdex::errors::{AssetError, Result};
use assetdex::scanner::{self, ScanEvent, ScanOptions};
use assetdex::storage::models::{Asset, AssetFilter, AssetUpdate, Library, RelationshipKind, Tag};
use assetdex::storage::sqlite::SqliteStorage;
use assetdex::storage::tags::parse_tag_string;
use assetdex::storage::{AssetOps, LibraryRegistry, TagOps};
use assetdex::task::WorkerTask;
use assetdex::verifier::{self, VerifyEvent};

#[derive(Parser)]
#[command(
    name = "assetdex",
    version,
    about = "Tag, rate and annotate files whose metadata follows them when they move"
)]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Use this database file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage libraries
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },

    /// Scan a library for new and moved files
    Scan {
        /// Library name or ID
        library: String,

        /// Flag every asset missing first, so files not found stay flagged
        #[arg(long)]
        full: bool,

        /// Only scan these extensions (comma separated)
        #[arg(long, value_delimiter = ',')]
        ext: Option<Vec<String>>,
    },

    /// Check that every asset still exists where it was last seen
    Verify {
        /// Library name or ID
        library: String,

        /// Search the library for moved files
        #[arg(short, long)]
        relocate: bool,
    },

    /// Delete assets currently flagged missing
    Cleanup {
        /// Library name or ID
        library: String,
    },

    /// List assets in a library
    Assets {
        /// Library name or ID
        library: String,

        /// Only assets carrying this tag (repeatable; all must match)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Minimum rating
        #[arg(short = 'r', long)]
        min_rating: Option<u8>,

        /// Include assets flagged missing
        #[arg(short = 'm', long)]
        include_missing: bool,

        /// Maximum number of assets to show
        #[arg(short, long)]
        limit: Option<i64>,

        /// Offset for pagination
        #[arg(short, long, default_value = "0")]
        offset: i64,
    },

    /// Inspect or edit a single asset
    Asset {
        #[command(subcommand)]
        action: AssetAction,
    },

    /// Add or remove tags on an asset
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// List tags
    Tags {
        /// Only tags used in this library
        #[arg(short = 'L', long)]
        library: Option<String>,

        /// Search tag names and namespaces
        #[arg(short, long)]
        search: Option<String>,

        /// Only tags in this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Maximum search results
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Manage tag aliases (siblings)
    Alias {
        #[command(subcommand)]
        action: RelationAction,
    },

    /// Manage tag parents (implications)
    Parent {
        #[command(subcommand)]
        action: RelationAction,
    },

    /// Show a tag with its aliases, parents and children
    TagInfo {
        /// Tag as "namespace:name" or "name"
        tag: String,
    },
}

#[derive(Subcommand)]
enum LibraryAction {
    /// Register a directory as a library
    Add {
        name: String,
        path: PathBuf,

        /// Only scan the top-level directory
        #[arg(long)]
        no_subdirs: bool,
    },
    /// List libraries
    List,
    /// Show one library
    Show { library: String },
    /// Rename, move or change recursion of a library
    Update {
        library: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        subdirs: Option<bool>,
    },
    /// Remove a library and all of its assets
    Remove { library: String },
    /// Asset counts for a library
    Stats { library: String },
}

#[derive(Subcommand)]
enum AssetAction {
    /// Show an asset
    Show { id: i64 },
    /// Set the rating (0-5)
    Rate { id: i64, rating: u8 },
    /// Set the notes
    Note { id: i64, text: String },
    /// Remove an asset record (the file is untouched)
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum TagAction {
    /// Tag an asset, creating tags as needed
    Add {
        asset: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Untag an asset
    Remove {
        asset: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RelationAction {
    /// Link two tags
    Add { tag: String, related: String },
    /// Unlink two tags
    Remove { tag: String, related: String },
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<i64>,
}

#[derive(Serialize)]
struct TagInfo {
    tag: Tag,
    canonical: Tag,
    usage: i64,
    aliases: Vec<Tag>,
    parents: Vec<Tag>,
    ancestors: Vec<Tag>,
    children: Vec<Tag>,
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::WARN
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let paths = match cli.db {
        Some(db) => AppPaths::with_db(db),
        None => AppPaths::new()?,
    };
    let storage = SqliteStorage::open(&paths.db_path)?;
    let json = cli.json;

    match cli.command {
        Commands::Library { action } => cmd_library(&storage, action, json),
        Commands::Scan { library, full, ext } => {
            let options = ScanOptions {
                incremental: !full,
                extensions: ext,
            };
            cmd_scan(&storage, &paths.db_path, &library, options, json)
        }
        Commands::Verify { library, relocate } => {
            cmd_verify(&storage, &paths.db_path, &library, relocate, json)
        }
        Commands::Cleanup { library } => cmd_cleanup(&storage, &library, json),
        Commands::Assets {
            library,
            tag,
            min_rating,
            include_missing,
            limit,
            offset,
        } => {
            let library = resolve_library(&storage, &library)?;
            let tag_ids = tag
                .iter()
                .map(|t| find_tag(&storage, t).map(|tag| tag.id))
                .collect::<Result<Vec<_>>>()?;
            let filter = AssetFilter {
                tag_ids,
                rating_min: min_rating,
                include_missing,
                limit,
                offset,
            };
            cmd_assets(&storage, &library, &filter, json)
        }
        Commands::Asset { action } => cmd_asset(&storage, action, json),
        Commands::Tag { action } => cmd_tag(&storage, action, json),
        Commands::Tags {
            library,
            search,
            namespace,
            limit,
        } => cmd_tags(&storage, library, search, namespace, limit, json),
        Commands::Alias { action } => cmd_relation(&storage, RelationshipKind::Sibling, action, json),
        Commands::Parent { action } => cmd_relation(&storage, RelationshipKind::Parent, action, json),
        Commands::TagInfo { tag } => cmd_tag_info(&storage, &tag, json),
    }
}

// --- Lookups ---

/// A library by name, falling back to a numeric ID.
fn resolve_library(storage: &SqliteStorage, key: &str) -> Result<Library> {
    if let Some(library) = storage.get_library_by_name(key)? {
        return Ok(library);
    }
    match key.parse::<i64>() {
        Ok(id) => storage.get_library(id),
        Err(_) => Err(AssetError::NotFound(format!("library \"{}\"", key))),
    }
}

fn find_tag(storage: &SqliteStorage, label: &str) -> Result<Tag> {
    let (namespace, name) = parse_tag_string(label);
    storage
        .get_tag_by_name(&name, &namespace)?
        .ok_or_else(|| AssetError::NotFound(format!("tag \"{}\"", label)))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn report(json: bool, success: bool, message: String, removed: Option<i64>) -> Result<()> {
    if json {
        print_json(&StatusResponse {
            success,
            message,
            removed,
        })
    } else {
        println!("{}", message);
        Ok(())
    }
}

// --- Libraries ---

fn cmd_library(storage: &SqliteStorage, action: LibraryAction, json: bool) -> Result<()> {
    match action {
        LibraryAction::Add {
            name,
            path,
            no_subdirs,
        } => {
            let root = path.canonicalize().map_err(|_| {
                AssetError::InvalidPath(format!("path does not exist: {}", path.display()))
            })?;
            let library = storage.create_library(&name, &root, !no_subdirs)?;
            if json {
                return print_json(&library);
            }
            println!(
                "Added library #{} \"{}\" at {}.",
                library.id,
                library.name,
                library.root_path.display()
            );
            Ok(())
        }
        LibraryAction::List => {
            let libraries = storage.get_all_libraries()?;
            if json {
                return print_json(&libraries);
            }
            if libraries.is_empty() {
                println!("No libraries.");
                return Ok(());
            }
            for library in &libraries {
                print_library_row(library);
            }
            Ok(())
        }
        LibraryAction::Show { library } => {
            let library = resolve_library(storage, &library)?;
            if json {
                return print_json(&library);
            }
            print_library_row(&library);
            Ok(())
        }
        LibraryAction::Update {
            library,
            name,
            path,
            subdirs,
        } => {
            let mut library = resolve_library(storage, &library)?;
            if let Some(name) = name {
                library.name = name;
            }
            if let Some(path) = path {
                library.root_path = path.canonicalize().map_err(|_| {
                    AssetError::InvalidPath(format!("path does not exist: {}", path.display()))
                })?;
            }
            if let Some(subdirs) = subdirs {
                library.scan_subdirs = subdirs;
            }
            let library = storage.update_library(&library)?;
            if json {
                return print_json(&library);
            }
            print_library_row(&library);
            Ok(())
        }
        LibraryAction::Remove { library } => {
            let library = resolve_library(storage, &library)?;
            let found = storage.delete_library(library.id)?;
            let message = if found {
                format!("Removed library \"{}\".", library.name)
            } else {
                format!("Library \"{}\" not found.", library.name)
            };
            report(json, found, message, None)
        }
        LibraryAction::Stats { library } => {
            let library = resolve_library(storage, &library)?;
            let stats = storage.get_library_stats(library.id)?;
            if json {
                return print_json(&stats);
            }
            println!("Library \"{}\"", library.name);
            println!("────────────────────");
            println!("Assets:   {}", stats.total_assets);
            println!("Missing:  {}", stats.missing_assets);
            println!("Tagged:   {}", stats.tagged_assets);
            Ok(())
        }
    }
}

// --- Scan / verify ---

/// Cancels the worker on Ctrl-C, drains its events and returns its result.
fn drive<E, T>(task: WorkerTask<E, T>, mut on_event: impl FnMut(E)) -> Result<T>
where
    E: Send + 'static,
    T: Send + 'static,
{
    let token = task.token().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        token.cancel();
    }) {
        warn!("Ctrl-C will not cancel this run: {}", e);
    }
    for event in task.events().iter() {
        on_event(event);
    }
    task.wait()
}

fn cmd_scan(
    storage: &SqliteStorage,
    db_path: &Path,
    library: &str,
    options: ScanOptions,
    json: bool,
) -> Result<()> {
    let library = resolve_library(storage, library)?;
    let task = scanner::start_scan(db_path, library.id, options)?;
    let summary = drive(task, |event| match event {
        ScanEvent::Progress {
            current,
            total,
            path,
        } => debug!("[{}/{}] {}", current, total, path.display()),
        ScanEvent::FileScanned { asset_id, path, added: true } => {
            info!("new asset #{}: {}", asset_id, path.display())
        }
        _ => {}
    })?;

    if json {
        return print_json(&summary);
    }
    println!(
        "Scanned \"{}\": {} added, {} updated, {} missing.{}",
        library.name,
        summary.added,
        summary.updated,
        summary.missing,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

fn cmd_verify(
    storage: &SqliteStorage,
    db_path: &Path,
    library: &str,
    relocate: bool,
    json: bool,
) -> Result<()> {
    let library = resolve_library(storage, library)?;
    let task = verifier::start_verify(db_path, library.id, relocate)?;
    let summary = drive(task, |event| match event {
        VerifyEvent::Missing { asset_id } => debug!("asset #{} missing", asset_id),
        VerifyEvent::Relocated { asset_id, path } => {
            info!("asset #{} found at {}", asset_id, path.display())
        }
        _ => {}
    })?;

    if json {
        return print_json(&summary);
    }
    println!(
        "Verified \"{}\": {} ok, {} missing, {} relocated.{}",
        library.name,
        summary.verified,
        summary.missing,
        summary.relocated,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

fn cmd_cleanup(storage: &SqliteStorage, library: &str, json: bool) -> Result<()> {
    let library = resolve_library(storage, library)?;
    let removed = storage.cleanup_missing_assets(library.id)?;
    report(
        json,
        true,
        format!("Removed {} missing asset(s) from \"{}\".", removed, library.name),
        Some(removed),
    )
}

// --- Assets ---

fn cmd_assets(storage: &SqliteStorage, library: &Library, filter: &AssetFilter, json: bool) -> Result<()> {
    let assets = storage.get_library_assets(library.id, filter)?;
    if json {
        return print_json(&assets);
    }
    if assets.is_empty() {
        println!("No assets found.");
        return Ok(());
    }
    for asset in &assets {
        print_asset_row(asset);
    }
    Ok(())
}

fn cmd_asset(storage: &SqliteStorage, action: AssetAction, json: bool) -> Result<()> {
    match action {
        AssetAction::Show { id } => {
            let asset = storage.get_asset(id)?;
            if json {
                return print_json(&asset);
            }
            print_asset_detail(&asset);
            Ok(())
        }
        AssetAction::Rate { id, rating } => {
            storage.update_asset(
                id,
                AssetUpdate {
                    rating: Some(rating),
                    ..Default::default()
                },
            )?;
            report(json, true, format!("Rated asset #{} {}/5.", id, rating), None)
        }
        AssetAction::Note { id, text } => {
            storage.update_asset(
                id,
                AssetUpdate {
                    notes: Some(text),
                    ..Default::default()
                },
            )?;
            report(json, true, format!("Updated notes on asset #{}.", id), None)
        }
        AssetAction::Remove { id } => {
            let found = storage.delete_asset(id)?;
            let message = if found {
                format!("Removed asset #{}.", id)
            } else {
                format!("Asset #{} not found.", id)
            };
            report(json, found, message, None)
        }
    }
}

// --- Tags ---

fn cmd_tag(storage: &SqliteStorage, action: TagAction, json: bool) -> Result<()> {
    match action {
        TagAction::Add { asset, tags } => {
            storage.get_asset(asset)?;
            for label in &tags {
                let tag = storage.get_or_create_from_string(label)?;
                storage.add_tag_to_asset(asset, tag.id)?;
            }
            report(
                json,
                true,
                format!("Tagged asset #{} with {}.", asset, tags.join(", ")),
                None,
            )
        }
        TagAction::Remove { asset, tags } => {
            for label in &tags {
                let tag = find_tag(storage, label)?;
                storage.remove_tag_from_asset(asset, tag.id)?;
            }
            report(
                json,
                true,
                format!("Removed {} from asset #{}.", tags.join(", "), asset),
                None,
            )
        }
    }
}

fn cmd_tags(
    storage: &SqliteStorage,
    library: Option<String>,
    search: Option<String>,
    namespace: Option<String>,
    limit: i64,
    json: bool,
) -> Result<()> {
    let (tags, counts) = match library {
        Some(key) => {
            let library = resolve_library(storage, &key)?;
            (
                storage.get_library_tags(library.id)?,
                Some(storage.get_library_tag_counts(library.id)?),
            )
        }
        None => match &search {
            Some(query) => (storage.search_tags(query, limit)?, None),
            None => match &namespace {
                Some(ns) => (storage.get_tags_by_namespace(ns)?, None),
                None => (storage.get_all_tags()?, None),
            },
        },
    };
    let ns_filter = namespace.map(|ns| ns.trim().to_lowercase());
    let query = search.map(|q| q.trim().to_lowercase());
    let tags: Vec<Tag> = tags
        .into_iter()
        .filter(|t| ns_filter.as_ref().is_none_or(|ns| t.namespace == *ns))
        .filter(|t| {
            query
                .as_ref()
                .is_none_or(|q| t.name.contains(q.as_str()) || t.namespace.contains(q.as_str()))
        })
        .collect();

    if json {
        return print_json(&tags);
    }
    if tags.is_empty() {
        println!("No tags found.");
        return Ok(());
    }
    for tag in &tags {
        match counts.as_ref().and_then(|c| c.get(&tag.id)) {
            Some(count) => println!("{:>4} {} ({})", tag.id, tag.full_name(), count),
            None => println!("{:>4} {}", tag.id, tag.full_name()),
        }
    }
    Ok(())
}

fn cmd_relation(
    storage: &SqliteStorage,
    kind: RelationshipKind,
    action: RelationAction,
    json: bool,
) -> Result<()> {
    let noun = match kind {
        RelationshipKind::Sibling => "alias",
        RelationshipKind::Parent => "parent",
    };
    match action {
        RelationAction::Add { tag, related } => {
            let a = storage.get_or_create_from_string(&tag)?;
            let b = storage.get_or_create_from_string(&related)?;
            match kind {
                RelationshipKind::Sibling => storage.add_sibling(a.id, b.id)?,
                RelationshipKind::Parent => storage.add_parent(a.id, b.id)?,
            }
            report(
                json,
                true,
                format!("Added {} \"{}\" to \"{}\".", noun, b.full_name(), a.full_name()),
                None,
            )
        }
        RelationAction::Remove { tag, related } => {
            let a = find_tag(storage, &tag)?;
            let b = find_tag(storage, &related)?;
            let found = storage.remove_relationship(a.id, b.id, kind)?;
            let message = if found {
                format!("Removed {} \"{}\" from \"{}\".", noun, b.full_name(), a.full_name())
            } else {
                format!("\"{}\" is not a {} of \"{}\".", b.full_name(), noun, a.full_name())
            };
            report(json, found, message, None)
        }
    }
}

fn cmd_tag_info(storage: &SqliteStorage, label: &str, json: bool) -> Result<()> {
    let tag = find_tag(storage, label)?;
    let info = TagInfo {
        canonical: storage.resolve_canonical_tag(tag.id)?,
        usage: storage.get_tag_usage_count(tag.id)?,
        aliases: storage.get_siblings(tag.id)?,
        parents: storage.get_parents(tag.id)?,
        ancestors: storage.get_all_parents(tag.id)?,
        children: storage.get_children(tag.id)?,
        tag,
    };
    if json {
        return print_json(&info);
    }

    println!("ID:        {}", info.tag.id);
    println!("Tag:       {}", info.tag.full_name());
    if info.canonical.id != info.tag.id {
        println!("Canonical: {}", info.canonical.full_name());
    }
    if let Some(color) = &info.tag.color {
        println!("Color:     {}", color);
    }
    println!("Used by:   {} asset(s)", info.usage);
    print_tag_list("Aliases:", &info.aliases);
    print_tag_list("Parents:", &info.parents);
    print_tag_list("Implies:", &info.ancestors);
    print_tag_list("Children:", &info.children);
    Ok(())
}

// --- Output ---

fn print_tag_list(label: &str, tags: &[Tag]) {
    if tags.is_empty() {
        return;
    }
    let names: Vec<String> = tags.iter().map(Tag::full_name).collect();
    println!("{:<10} {}", label, names.join(", "));
}

fn print_library_row(library: &Library) {
    let mode = if library.scan_subdirs { "recursive" } else { "top-level" };
    println!(
        "{:>4} {:<20} {} ({})",
        library.id,
        library.name,
        library.root_path.display(),
        mode
    );
}

fn print_asset_row(asset: &Asset) {
    let stars = "*".repeat(asset.rating as usize);
    let flag = if asset.is_missing { "!" } else { " " };
    let tags = if asset.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", asset.tags.join(", "))
    };
    println!(
        "{:>5} {}{:<5} {:>9}  {}{}",
        asset.id,
        flag,
        stars,
        format_bytes(asset.file_size),
        asset.original_filename,
        tags
    );
}

fn print_asset_detail(asset: &Asset) {
    println!("ID:        {}", asset.id);
    println!("Library:   {}", asset.library_id);
    println!("File:      {}", asset.original_filename);
    match &asset.current_path {
        Some(path) => println!("Path:      {}", path.display()),
        None => println!("Path:      unknown"),
    }
    println!("Hash:      {}", &asset.partial_hash[..asset.partial_hash.len().min(16)]);
    println!("Size:      {}", format_bytes(asset.file_size));
    println!("Rating:    {}/5", asset.rating);
    println!("Missing:   {}", asset.is_missing);
    println!("Created:   {}", asset.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(seen) = asset.last_seen_at {
        println!("Seen:      {}", seen.format("%Y-%m-%d %H:%M:%S"));
    }
    if !asset.tags.is_empty() {
        println!("Tags:      {}", asset.tags.join(", "));
    }
    if let Some(notes) = &asset.notes {
        println!("─────────────────────────");
        println!("{}", notes);
    }
}

fn format_bytes(bytes: i64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
