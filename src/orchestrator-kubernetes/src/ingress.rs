// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use hearth_cloud_resources::crd::ingress_route::v1alpha1::{
    HttpRoute, IngressRoute, IngressRouteSpec, IngressRouteTcp, IngressRouteTcpSpec,
    MiddlewareRef, RouteService, RouteTls, TcpRoute,
};
use hearth_cloud_resources::naming::{self, Component, TenantEndpoints};
use hearth_cloud_resources::TenantRef;

use crate::pod::object_meta;
use crate::KubernetesTenantOrchestratorConfig;

fn path_route(
    host: &str,
    prefix: &str,
    service: String,
    port: u16,
    middlewares: Vec<MiddlewareRef>,
) -> HttpRoute {
    HttpRoute {
        match_: format!("Host(`{host}`) && PathPrefix(`{prefix}`)"),
        kind: "Rule".into(),
        services: vec![RouteService {
            name: service,
            port: port.into(),
        }],
        middlewares,
    }
}

/// Renders the HTTP route publishing the auth API, the REST API and the docs
/// viewer under the tenant's host.
pub(crate) fn create_http_route_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
) -> IngressRoute {
    let endpoints = TenantEndpoints::new(tenant, &config.external_domain);
    let strip_prefix: Vec<_> = config
        .strip_prefix_middleware
        .iter()
        .map(|name| MiddlewareRef { name: name.clone() })
        .collect();
    let routes = vec![
        path_route(
            &endpoints.host,
            naming::AUTH_PATH,
            naming::auth_api_name(tenant),
            config.auth_api_port,
            vec![],
        ),
        path_route(
            &endpoints.host,
            naming::REST_PATH,
            naming::rest_api_name(tenant),
            config.rest_api_port,
            strip_prefix,
        ),
        path_route(
            &endpoints.host,
            naming::DOCS_PATH,
            naming::rest_api_name(tenant),
            config.docs_port,
            vec![],
        ),
    ];
    let mut route = IngressRoute::new(
        &naming::http_ingress_route_name(tenant),
        IngressRouteSpec {
            entry_points: config.http_entry_points.clone(),
            routes,
            tls: Some(RouteTls {
                secret_name: Some(config.tls_secret_name.clone()),
                passthrough: None,
            }),
        },
    );
    route.metadata = object_meta(
        config,
        namespace,
        tenant,
        Component::HttpIngressRoute,
        naming::http_ingress_route_name(tenant),
    );
    route
}

/// Renders the TCP route forwarding Postgres connections for the tenant's
/// database host to its primary.
pub(crate) fn create_tcp_route_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
) -> IngressRouteTcp {
    let endpoints = TenantEndpoints::new(tenant, &config.external_domain);
    let mut route = IngressRouteTcp::new(
        &naming::tcp_ingress_route_name(tenant),
        IngressRouteTcpSpec {
            entry_points: config.tcp_entry_points.clone(),
            routes: vec![TcpRoute {
                match_: format!("HostSNI(`{}`)", endpoints.database_host),
                services: vec![RouteService {
                    name: naming::cluster_rw_service_name(tenant),
                    port: naming::DATABASE_PORT.into(),
                }],
            }],
            tls: Some(RouteTls {
                secret_name: Some(config.tls_secret_name.clone()),
                passthrough: Some(false),
            }),
        },
    );
    route.metadata = object_meta(
        config,
        namespace,
        tenant,
        Component::TcpIngressRoute,
        naming::tcp_ingress_route_name(tenant),
    );
    route
}
