/// Configuration for the SDN overlay.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local listen address (e.g. "/ip4/0.0.0.0/tcp/7878").
    pub listen_addr: String,
    /// Bootstrap peer multiaddresses.
    pub bootstrap_peers: Vec<String>,
    /// Protocol version string advertised to peers via identify.
    pub protocol_version: String,
    /// Schemas to subscribe to at startup.
    pub subscribe_schemas: Vec<String>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/7878".into(),
            bootstrap_peers: Vec::new(),
            protocol_version: "/spacedatanetwork/1.0.0".into(),
            subscribe_schemas: Vec::new(),
        }
    }
}
