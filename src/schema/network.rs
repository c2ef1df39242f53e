//! Networking kinds: ALB, NLB, CloudFront, APIGateway

use serde::{Deserialize, Serialize};

// ============================================================================
// LOAD BALANCERS (ALB / NLB share a spec)
// ============================================================================

/// Listener forwarding traffic to a sibling component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Listener {
    pub port: u16,
    /// HTTP, HTTPS, TCP, TLS, UDP
    pub protocol: String,
    /// Component name the listener forwards to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
}

/// Application or network load balancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoadBalancerSpec {
    #[serde(default)]
    pub internal: bool,
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    #[serde(default)]
    pub idle_timeout_seconds: Option<u32>,
}

// ============================================================================
// CLOUDFRONT
// ============================================================================

/// Distribution origin: a sibling component or a literal domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Origin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<String>,
}

/// CDN distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CloudFrontSpec {
    pub origins: Vec<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_root_object: Option<String>,
    #[serde(default = "default_price_class")]
    pub price_class: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

fn default_price_class() -> String {
    "PriceClass_100".to_string()
}

// ============================================================================
// API GATEWAY
// ============================================================================

/// Route binding a method+path to a sibling component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Route {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_component: Option<String>,
}

fn default_method() -> String {
    "ANY".to_string()
}

/// Managed API front door
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiGatewaySpec {
    /// HTTP, REST, or WEBSOCKET
    #[serde(default = "default_protocol_type")]
    pub protocol_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default = "default_stage")]
    pub stage_name: String,
    #[serde(default)]
    pub cors: bool,
}

fn default_protocol_type() -> String {
    "HTTP".to_string()
}

fn default_stage() -> String {
    "$default".to_string()
}
