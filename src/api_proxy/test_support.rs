use super::catalog::{Provider, Tier};
use super::resolver::ResolvedTarget;

pub fn should_skip_httpmock() -> bool {
    if can_bind_localhost() {
        return false;
    }
    eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
    true
}

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

/// Active provider `name` with key `sk-{name}`, offering `models`.
pub fn provider(id: i64, name: &str, base_url: &str, models: &[&str]) -> Provider {
    Provider {
        id,
        name: name.to_string(),
        provider_type: "openai".to_string(),
        base_url: base_url.to_string(),
        api_key: format!("sk-{}", name),
        model_list: models.iter().map(|m| m.to_string()).collect(),
        small_model: None,
        medium_model: None,
        big_model: None,
        headers: Default::default(),
        verify_ssl: true,
        is_active: true,
    }
}

pub fn target(name: &str, base_url: &str, model: &str) -> ResolvedTarget {
    ResolvedTarget {
        provider: provider(1, name, base_url, &[model]),
        mapped_model: model.to_string(),
        tier_used: Tier::Medium,
        fallback_used: false,
    }
}
