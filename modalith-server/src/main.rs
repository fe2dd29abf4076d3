// Copyright 2025 Modalith (https://github.com/modalith)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::Parser;
use modalith_server::config::ServerConfig;
use modalith_server::run_server;

/// Multi-modal retrieval platform server.
#[derive(Debug, Parser)]
#[command(name = "modalith-server", version)]
struct Cli {
    /// Listen address, overriding MODALITH_HTTP_ADDR.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    run_server(config).await
}
