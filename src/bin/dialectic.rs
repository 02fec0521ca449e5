use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use dialectic::{
    config::{init_tracing, ServerArgs, TransportKind},
    mcp::{self, Connection, PatternTools, ToolHandler},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    init_tracing("info,dialectic=debug");

    match args.transport {
        TransportKind::Stdio => {
            let connection = Connection::new();
            let backend = args.engine.build_backend(args.backend, Some(connection.peer()))?;
            let engine = Arc::new(args.engine.build_engine(backend));
            tracing::info!(
                backend = engine.backend_name(),
                max_concurrency = engine.max_concurrency(),
                "serving MCP over stdio"
            );

            let handler: Arc<dyn ToolHandler> = Arc::new(PatternTools::new(engine));
            connection
                .serve(tokio::io::stdin(), tokio::io::stdout(), handler)
                .await?;
        }
        TransportKind::Http => {
            let backend = args.engine.build_backend(args.backend, None)?;
            let engine = Arc::new(args.engine.build_engine(backend));
            let handler: Arc<dyn ToolHandler> = Arc::new(PatternTools::new(engine));
            let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
            mcp::http::serve(addr, handler).await?;
        }
    }

    Ok(())
}
