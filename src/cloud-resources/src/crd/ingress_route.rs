// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod v1alpha1 {
    use super::*;

    /// An HTTP route through the ingress controller.
    #[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[kube(
        namespaced,
        group = "traefik.io",
        version = "v1alpha1",
        kind = "IngressRoute",
        singular = "ingressroute",
        plural = "ingressroutes"
    )]
    pub struct IngressRouteSpec {
        pub entry_points: Vec<String>,
        pub routes: Vec<HttpRoute>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tls: Option<RouteTls>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct HttpRoute {
        /// A rule like ``Host(`a.example.dev`) && PathPrefix(`/api`)``.
        #[serde(rename = "match")]
        pub match_: String,
        /// Always `Rule`.
        pub kind: String,
        pub services: Vec<RouteService>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub middlewares: Vec<MiddlewareRef>,
    }

    /// A raw TCP route through the ingress controller, matched on the TLS
    /// server name.
    #[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[kube(
        namespaced,
        group = "traefik.io",
        version = "v1alpha1",
        kind = "IngressRouteTCP",
        root = "IngressRouteTcp",
        singular = "ingressroutetcp",
        plural = "ingressroutetcps"
    )]
    pub struct IngressRouteTcpSpec {
        pub entry_points: Vec<String>,
        pub routes: Vec<TcpRoute>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tls: Option<RouteTls>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct TcpRoute {
        /// A rule like ``HostSNI(`a.db.example.dev`)``.
        #[serde(rename = "match")]
        pub match_: String,
        pub services: Vec<RouteService>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct RouteService {
        pub name: String,
        pub port: i32,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct MiddlewareRef {
        pub name: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct RouteTls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub secret_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub passthrough: Option<bool>,
    }
}

#[cfg(test)]
mod tests {
    use kube::Resource;

    use super::v1alpha1::*;

    #[test]
    fn resource_metadata() {
        assert_eq!(IngressRouteTcp::kind(&()), "IngressRouteTCP");
        assert_eq!(IngressRouteTcp::plural(&()), "ingressroutetcps");
        assert_eq!(IngressRoute::api_version(&()), "traefik.io/v1alpha1");
    }

    #[test]
    fn match_field_is_renamed() {
        let route = TcpRoute {
            match_: "HostSNI(`a.db.example.dev`)".into(),
            services: vec![],
        };
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["match"], "HostSNI(`a.db.example.dev`)");
    }
}
