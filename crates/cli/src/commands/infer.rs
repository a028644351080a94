//! `hash-ai-worker infer`: one entity inference from files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use hash_ai_config::WorkerConfig;
use hash_ai_core::ontology::EntityType;
use hash_ai_inference::InferEntitiesRequest;
use hash_ai_runtime::{ActivityContext, INFER_ENTITIES, default_registry};
use tokio_util::sync::CancellationToken;

use super::{build_driver, usage_reporter};

pub struct InferArgs {
    pub text_file: PathBuf,
    pub entity_types_file: PathBuf,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub instructions: Option<String>,
}

pub async fn run(path: Option<&Path>, args: InferArgs) -> anyhow::Result<()> {
    let config = WorkerConfig::load(path).context("Failed to load config")?;
    let request = read_request(args)?;

    let driver = build_driver(&config).await?;
    let registry = default_registry(driver, Some(usage_reporter(&config)));
    let activity = registry
        .get(INFER_ENTITIES)
        .context("inferEntities activity is not registered")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let ctx = ActivityContext::new("cli", cancel);
    let output = activity.execute(&ctx, serde_json::to_value(&request)?).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_request(args: InferArgs) -> anyhow::Result<InferEntitiesRequest> {
    let text = std::fs::read_to_string(&args.text_file)
        .with_context(|| format!("Failed to read {}", args.text_file.display()))?;
    let types = std::fs::read_to_string(&args.entity_types_file)
        .with_context(|| format!("Failed to read {}", args.entity_types_file.display()))?;
    let entity_types: Vec<EntityType> = serde_json::from_str(&types).with_context(|| {
        format!("{} is not a JSON array of entity types", args.entity_types_file.display())
    })?;

    anyhow::ensure!(!text.trim().is_empty(), "{} is empty", args.text_file.display());

    Ok(InferEntitiesRequest {
        text,
        entity_types,
        model: args.model,
        max_tokens: args.max_tokens,
        instructions: args.instructions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn args(text: &tempfile::NamedTempFile, types: &tempfile::NamedTempFile) -> InferArgs {
        InferArgs {
            text_file: text.path().to_path_buf(),
            entity_types_file: types.path().to_path_buf(),
            model: "gpt-4o".into(),
            max_tokens: Some(512),
            instructions: None,
        }
    }

    #[test]
    fn builds_the_request_from_files() {
        let text = write("Ada Lovelace wrote the first program.");
        let types = write(
            r#"[{
                "id": "https://hash.ai/@hash/types/entity-type/person/v/1",
                "title": "Person",
                "properties": {}
            }]"#,
        );

        let request = read_request(args(&text, &types)).unwrap();
        assert_eq!(request.entity_types.len(), 1);
        assert_eq!(request.entity_types[0].title, "Person");
        assert_eq!(request.max_tokens, Some(512));
        assert!(request.text.starts_with("Ada"));
    }

    #[test]
    fn rejects_non_array_entity_types() {
        let text = write("text");
        let types = write(r#"{"title": "Person"}"#);
        let err = read_request(args(&text, &types)).unwrap_err();
        assert!(err.to_string().contains("not a JSON array"));
    }

    #[test]
    fn rejects_empty_text() {
        let text = write("  \n");
        let types = write("[]");
        assert!(read_request(args(&text, &types)).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let types = write("[]");
        let err = read_request(InferArgs {
            text_file: PathBuf::from("/nonexistent/text.txt"),
            entity_types_file: types.path().to_path_buf(),
            model: "gpt-4o".into(),
            max_tokens: None,
            instructions: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/text.txt"));
    }
}
