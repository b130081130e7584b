use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models::{department, host, hyperlink, server, server_update, service, ssl_certificate, user, vm};
use crate::routes::{
	audit_log, auth, dashboard, departments, health, hosts, hyperlinks, server_updates, servers, services,
	ssl_certificates, users, vms,
};
use crate::{audit, authz, routes, ssl};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		auth::register,
		auth::login,
		auth::me,
		auth::logout,
		auth::stop_impersonating,
		dashboard::dashboard,
		departments::list_departments,
		departments::get_department,
		departments::create_department,
		departments::update_department,
		departments::delete_department,
		users::list_users,
		users::get_user,
		users::create_user,
		users::update_user,
		users::delete_user,
		users::impersonate_user,
		servers::list_servers,
		servers::get_server,
		servers::create_server,
		servers::update_server,
		servers::delete_server,
		server_updates::list_server_updates,
		server_updates::create_server_update,
		services::list_services,
		services::get_service,
		services::create_service,
		services::update_service,
		services::delete_service,
		hyperlinks::list_hyperlinks,
		hyperlinks::get_hyperlink,
		hyperlinks::create_hyperlink,
		hyperlinks::update_hyperlink,
		hyperlinks::delete_hyperlink,
		hyperlinks::check_ssl,
		hosts::list_hosts,
		hosts::get_host,
		hosts::list_host_vms,
		hosts::create_host,
		hosts::update_host,
		hosts::delete_host,
		vms::list_vms,
		vms::get_vm,
		vms::create_vm,
		vms::update_vm,
		vms::delete_vm,
		ssl_certificates::list_certificates,
		ssl_certificates::get_certificate,
		ssl_certificates::run_check,
		audit_log::list_entries,
		audit_log::verify
	),
	components(
		schemas(
			routes::MessageResponse,
			health::HealthResponse,
			dashboard::DashboardSummary,
			authz::Role,
			authz::Identity,
			user::User,
			user::AuthResponse,
			user::MeResponse,
			user::LoginRequest,
			user::RegisterRequest,
			user::UserCreateRequest,
			user::UserUpdateRequest,
			department::Department,
			department::DepartmentRequest,
			server::Server,
			server::ServerPage,
			server::ServerCreateRequest,
			server::ServerUpdateRequest,
			server_update::ServerUpdate,
			server_update::ServerUpdateCreateRequest,
			service::Service,
			service::ServiceStatus,
			service::ServiceCreateRequest,
			service::ServiceUpdateRequest,
			hyperlink::HyperLink,
			hyperlink::HyperLinkCreateRequest,
			hyperlink::HyperLinkUpdateRequest,
			host::Host,
			host::HostStatus,
			host::HostCreateRequest,
			host::HostUpdateRequest,
			vm::VirtualMachine,
			vm::VmStatus,
			vm::VirtualMachineCreateRequest,
			vm::VirtualMachineUpdateRequest,
			ssl_certificate::SslCertificate,
			ssl_certificate::NotificationStatus,
			ssl_certificate::CertificateGroups,
			ssl::CertificateStatus,
			ssl::CheckSummary,
			audit::AuditAction,
			audit::AuditLogEntry,
			audit::FieldChange,
			audit::ChainReport
		)
	),
	tags(
		(name = "Health", description = "Liveness and database check"),
		(name = "Auth", description = "Sessions, current identity and impersonation"),
		(name = "Dashboard", description = "Scoped inventory counts"),
		(name = "Departments", description = "Department management"),
		(name = "Users", description = "User administration"),
		(name = "Servers", description = "Servers and their maintenance history"),
		(name = "Services", description = "Services running on servers"),
		(name = "Hyperlinks", description = "Monitored URLs"),
		(name = "Hosts", description = "Hyper-V hosts"),
		(name = "Virtual Machines", description = "Virtual machines on hosts"),
		(name = "SSL Certificates", description = "Certificate expiry tracking"),
		(name = "Audit Log", description = "Tamper-evident change history")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_public_operations(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

/// Operations reachable without a bearer token.
const PUBLIC_OPERATIONS: [&str; 3] = ["/api/health", "/auth/register", "/auth/login"];

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};

	let components = root.entry("components").or_insert_with(|| Value::Object(Map::new()));
	if let Some(components) = components.as_object_mut() {
		let schemes = components
			.entry("securitySchemes")
			.or_insert_with(|| Value::Object(Map::new()));
		if let Some(schemes) = schemes.as_object_mut() {
			schemes.insert(
				"bearerAuth".to_string(),
				json!({
					"type": "http",
					"scheme": "bearer",
					"bearerFormat": "JWT"
				}),
			);
		}
	}

	root.entry("security").or_insert_with(|| json!([{ "bearerAuth": [] }]));
}

fn ensure_public_operations(doc: &mut Value) {
	let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else {
		return;
	};

	for path in PUBLIC_OPERATIONS {
		if let Some(operations) = paths.get_mut(path).and_then(Value::as_object_mut) {
			for operation in operations.values_mut() {
				if let Some(operation) = operation.as_object_mut() {
					operation.insert("security".to_string(), json!([]));
				}
			}
		}
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	// Try-it-out should call the backend with the scheme it actually serves.
	let tls_enabled = std::env::var("TLS_CERT_PATH").is_ok() && std::env::var("TLS_KEY_PATH").is_ok();
	let scheme = if tls_enabled { "https" } else { "http" };
	let server_url = format!("{scheme}://localhost:{port}");

	match doc.get_mut("servers") {
		Some(Value::Array(servers)) => {
			let has = servers
				.iter()
				.any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				servers.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
