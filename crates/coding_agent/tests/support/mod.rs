#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use agent_provider_mock::{MockProvider, MOCK_MODEL_ID};
use coding_agent::{
    AgentEvent, Conversation, NativeTools, Orchestrator, OrchestratorSettings, ProviderRegistry, ToolDispatcher,
    ToolLimits,
};
use mcp_client::McpManager;

pub fn native_tools(root: &Path) -> Arc<NativeTools> {
    Arc::new(NativeTools::new(root, ToolLimits::default()).expect("workspace root should be valid"))
}

pub fn mock(provider_id: &str) -> MockProvider {
    MockProvider::with_profile(provider_id, MOCK_MODEL_ID, Vec::new())
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub providers: Vec<(String, MockProvider)>,
}

impl Harness {
    pub fn provider(&self, id: &str) -> &MockProvider {
        self.providers
            .iter()
            .find(|(provider_id, _)| provider_id == id)
            .map(|(_, provider)| provider)
            .expect("provider is registered")
    }
}

pub fn harness(root: &Path, provider_ids: &[&str], settings: OrchestratorSettings) -> Harness {
    harness_with_mcp(root, provider_ids, settings, McpManager::empty())
}

pub fn harness_with_mcp(
    root: &Path,
    provider_ids: &[&str],
    settings: OrchestratorSettings,
    mcp: McpManager,
) -> Harness {
    let providers: Vec<(String, MockProvider)> =
        provider_ids.iter().map(|id| ((*id).to_string(), mock(id))).collect();
    let mut registry = ProviderRegistry::new();
    for (id, provider) in &providers {
        registry.insert(id.clone(), Arc::new(provider.clone()));
    }
    let orchestrator = Orchestrator::new(
        registry,
        provider_ids[0],
        ToolDispatcher::new(native_tools(root), Arc::new(mcp)),
        Conversation::new(),
        settings,
    )
    .expect("active provider is registered");
    Harness {
        orchestrator,
        providers,
    }
}

pub fn text_of(events: &[AgentEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
