use clap::{Parser, Subcommand, ValueEnum};
use docmap::document::{from_json_object, to_json_object, ID_FIELD};
use docmap::validation::validate_document;
use docmap::{
    parse_schema, Document, DocumentStore, FindOptions, JoinSpec, Model, ObjectId, SchemaDefinition,
    SqliteStore, Transformer, UpdateOptions, Value,
};
use std::path::{Path, PathBuf};
use std::process;

const SCHEMA_FILE: &str = "schema.yaml";
const DB_FILE: &str = "_docmap.db";

/// docmap CLI — run documents through a schema and a local document store
#[derive(Parser)]
#[command(name = "docmap", version, about)]
struct Cli {
    /// Path to the data directory holding schema.yaml (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a new document
    Insert {
        /// Model name
        model: String,
        /// Field values (e.g. --field name="Alice Chen"); values are parsed as JSON when possible
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Apply a partial update to a document
    Update {
        /// Model name
        model: String,
        /// Document ID
        id: String,
        /// Field values or array directives (e.g. --field 'tags={"$delete":["..."]}')
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Restore the document if any update action fails
        #[arg(long)]
        revert_on_error: bool,
    },

    /// Find documents in a model's collection
    Find {
        /// Model name
        model: String,
        /// Equality filters (e.g. --filter status=published)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Reference paths to resolve, comma-separated per join (e.g. --join author,editor)
        #[arg(long = "join")]
        joins: Vec<String>,
        /// Maximum number of documents
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Get a single document by ID
    Get {
        /// Model name
        model: String,
        /// Document ID
        id: String,
        /// Reference paths to resolve
        #[arg(long = "join")]
        joins: Vec<String>,
    },

    /// Show the update actions a partial update compiles to
    Compile {
        /// Model name
        model: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Show a document after defaults, setters and coercion
    Transform {
        /// Model name
        model: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Transform as a new document (defaults and identifiers)
        #[arg(long)]
        insert: bool,
    },

    /// Check a stored document against its model
    Validate {
        /// Model name
        model: String,
        /// Document ID
        id: String,
    },

    /// Install validators for every model
    Sync,

    /// Show models, collections and document counts
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let schema = parse_schema(&cli.data_dir.join(SCHEMA_FILE))?;
    let store = open_store(&cli.data_dir)?;

    match cli.command {
        Command::Insert { model, fields } => {
            let model = Model::new(&store, &schema, &model)?;
            let id = model.insert_one(fields_to_document(&fields)?).await?;
            print_output(&serde_json::json!({ "id": id.to_json() }), &cli.format)?;
        }

        Command::Update {
            model,
            id,
            fields,
            revert_on_error,
        } => {
            let model = Model::new(&store, &schema, &model)?;
            let mut update = fields_to_document(&fields)?;
            update.insert(ID_FIELD.to_string(), id_value(&id));
            let outcome = model.update_one(update, UpdateOptions { revert_on_error }).await?;

            let actions: Vec<&str> = outcome.results.iter().map(|(kind, _)| kind.operator()).collect();
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "actions": actions,
                    "document": outcome.value.as_ref().map(to_json_object),
                }),
                &cli.format,
            )?;
        }

        Command::Find {
            model,
            filters,
            joins,
            limit,
        } => {
            let model = Model::new(&store, &schema, &model)?;
            let options = FindOptions {
                join: parse_joins(&joins),
                limit,
                ..FindOptions::default()
            };
            let rows = model.find(fields_to_document(&filters)?, options).await?.into_rows();
            let rows: Vec<serde_json::Value> = rows.iter().map(to_json_object).collect();
            print_output(&serde_json::Value::Array(rows), &cli.format)?;
        }

        Command::Get { model, id, joins } => {
            let model = Model::new(&store, &schema, &model)?;
            let doc = model
                .find_one(id_query(&id), parse_joins(&joins))
                .await?
                .ok_or_else(|| format!("Document '{id}' not found in '{}'", model.collection()))?;
            print_output(&to_json_object(&doc), &cli.format)?;
        }

        Command::Compile { model, fields } => {
            let model = Model::new(&store, &schema, &model)?;
            let compiled = model.compile_update(&fields_to_document(&fields)?)?;
            let actions: Vec<serde_json::Value> = compiled
                .actions()
                .iter()
                .map(|action| {
                    let filters: Vec<serde_json::Value> =
                        action.filter_documents().iter().map(to_json_object).collect();
                    serde_json::json!({
                        "update": to_json_object(&action.to_payload()),
                        "array_filters": filters,
                    })
                })
                .collect();
            print_output(
                &serde_json::json!({ "atomic": compiled.is_atomic(), "actions": actions }),
                &cli.format,
            )?;
        }

        Command::Transform { model, fields, insert } => {
            let definition = schema.model(&model)?;
            let mut doc = fields_to_document(&fields)?;
            let transformer = if insert { Transformer::insert() } else { Transformer::update() };
            transformer.transform_document(&mut doc, definition)?;
            print_output(&to_json_object(&doc), &cli.format)?;
        }

        Command::Validate { model, id } => {
            let model = Model::new(&store, &schema, &model)?;
            let doc = model
                .find_one(id_query(&id), Vec::new())
                .await?
                .ok_or_else(|| format!("Document '{id}' not found in '{}'", model.collection()))?;
            let result = validate_document(model.definition(), &doc);
            print_output(
                &serde_json::json!({
                    "ok": result.is_ok(),
                    "errors": result.errors,
                    "warnings": result.warnings,
                }),
                &cli.format,
            )?;
        }

        Command::Sync => {
            let mut synced = Vec::new();
            for name in schema.models.keys() {
                let model = Model::new(&store, &schema, name)?;
                model.sync_collection().await?;
                synced.push(model.collection().to_string());
            }
            print_output(&serde_json::json!({ "ok": true, "collections": synced }), &cli.format)?;
        }

        Command::Status => {
            let status = status(&store, &schema).await?;
            print_output(&status, &cli.format)?;
        }
    }

    Ok(())
}

fn open_store(data_dir: &Path) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    log::info!("Opening store at: {}", data_dir.display());
    Ok(SqliteStore::open(&data_dir.join(DB_FILE))?)
}

async fn status(store: &SqliteStore, schema: &SchemaDefinition) -> docmap::Result<serde_json::Value> {
    let mut models = serde_json::Map::new();
    for (name, definition) in &schema.models {
        let count = store
            .find(definition.collection_name(), &Document::new(), &Default::default())
            .await?
            .len();
        models.insert(
            name.clone(),
            serde_json::json!({
                "collection": definition.collection_name(),
                "strict": definition.strict,
                "fields": definition.fields.len(),
                "documents": count,
                "validator": store.validator(definition.collection_name())?.is_some(),
            }),
        );
    }
    Ok(serde_json::json!({
        "models": models,
        "collections": store.list_collections().await?,
    }))
}

/// Each `--join` value is one join; commas separate its paths.
fn parse_joins(joins: &[String]) -> Vec<JoinSpec> {
    joins
        .iter()
        .map(|paths| JoinSpec::on(paths.split(',').map(str::trim).filter(|p| !p.is_empty())))
        .collect()
}

fn id_value(id: &str) -> Value {
    ObjectId::parse(id).map_or_else(|| Value::from(id), Value::Id)
}

fn id_query(id: &str) -> Document {
    let mut query = Document::new();
    query.insert(ID_FIELD.to_string(), id_value(id));
    query
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}

/// Build a document from `key=value` pairs. Values are parsed as JSON when
/// possible; dotted keys build nested documents.
fn fields_to_document(fields: &[(String, String)]) -> Result<Document, Box<dyn std::error::Error>> {
    let mut root = serde_json::Map::new();
    for (key, val) in fields {
        let json_val = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        let mut segments: Vec<&str> = key.split('.').collect();
        let Some(leaf) = segments.pop() else {
            continue;
        };

        let mut map = &mut root;
        for segment in segments {
            let entry = map
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            map = entry
                .as_object_mut()
                .ok_or_else(|| format!("Field '{key}' conflicts with a non-object value"))?;
        }
        map.insert(leaf.to_string(), json_val);
    }
    from_json_object(serde_json::Value::Object(root))
        .ok_or_else(|| "Fields must form a document".into())
}
