use anyhow::Result;

use crate::cli::output::{ServiceProbe, StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, VectorDriver};
use crate::services::{create_backend, create_embedder, create_generator};

fn probe(name: &str, detail: String, result: Result<(), String>) -> ServiceProbe {
    ServiceProbe {
        name: name.to_string(),
        detail,
        healthy: result.is_ok(),
        error: result.err(),
    }
}

pub async fn handle_status(format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let embedding_detail = format!("{} ({})", config.embedding.model, config.embedding.driver);
    let embedding = match create_embedder(&config.embedding) {
        Ok(embedder) => embedder.health_check().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let store_detail = format!("{} {}", config.vector_store.driver, config.vector_store.url);
    let (store, vector_count) = match create_backend(&config.vector_store) {
        Ok(store) => match store.index_info().await {
            Ok(Some(info)) => (Ok(()), Some(info.vector_count)),
            Ok(None) => (Err(format!("index '{}' not found", store.index())), None),
            Err(e) => (Err(e.to_string()), None),
        },
        Err(e) => (Err(e.to_string()), None),
    };

    let generation = match create_generator(&config.generation) {
        Ok(generator) => generator.health_check().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let store_ok = store.is_ok();
    let status = StatusInfo {
        embedding: probe("Embedding", embedding_detail, embedding),
        vector_store: probe("Vector Store", store_detail, store),
        generation: probe("Generation", config.generation.model.clone(), generation),
        index: config.vector_store.index.clone(),
        namespace: config.vector_store.namespace.clone(),
        vector_count,
        top_k: config.vector_store.top_k,
    };

    print!("{}", formatter.format_status(&status));

    if !store_ok {
        eprintln!();
        match config.vector_store.driver {
            VectorDriver::Pinecone => {
                eprintln!("Hint: set PINECONE_API_KEY and PINECONE_INDEX_HOST for the index.");
            }
            VectorDriver::Qdrant => {
                eprintln!("Hint: Qdrant not reachable. Start with: docker run -p 6334:6334 qdrant/qdrant");
            }
        }
    }

    Ok(())
}
