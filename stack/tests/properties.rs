use authz::types::{AuthState, FederatedClaims, Principal};
use authz::PolicyEngine;
use stack::blueprint::{self, ids};
use stack::{StackBuilder, StackConfig, StackGraph};

fn reference() -> StackGraph {
    blueprint::synthesize(StackConfig::default()).unwrap()
}

#[test]
fn test_identity_first_order_yields_same_graph() {
    let mut b = StackBuilder::new(StackConfig::default()).unwrap();
    let identity = blueprint::declare_identity_plane(&mut b).unwrap();
    let data = blueprint::declare_data_plane(&mut b).unwrap();
    blueprint::declare_api_plane(&mut b, &data, &identity).unwrap();
    let reordered = b.finalize().unwrap();

    assert_eq!(reordered.to_json().unwrap(), reference().to_json().unwrap());
}

#[test]
fn test_hand_interleaved_order_yields_same_graph() {
    use stack::resources::*;
    use stack::{FunctionProps, TableProps};

    let config = StackConfig::default();
    let mut b = StackBuilder::new(config.clone()).unwrap();

    // Identity pieces interleaved with data pieces, roles in reverse.
    let pool = b
        .user_pool(ids::USER_POOL, blueprint::user_pool_props(&config))
        .unwrap();
    let table = b
        .table(
            ids::TABLE,
            TableProps {
                partition_key: KeyAttribute::string("pk"),
                sort_key: Some(KeyAttribute::string("sk")),
            },
        )
        .unwrap();
    let client = b
        .add_client(&pool, ids::CLIENT, blueprint::client_props(&config))
        .unwrap();
    let api = b.rest_api(ids::REST_API).unwrap();
    let authorizer = b.create_authorizer(ids::AUTHORIZER, &[pool.clone()]).unwrap();
    let function = b
        .function(
            ids::FUNCTION,
            FunctionProps::new(blueprint::SCAN_HANDLER, Runtime::Python312, "src")
                .env_table_name(blueprint::TABLE_ENV, &table),
        )
        .unwrap();
    b.bind_method(
        &api,
        "scan",
        HttpMethod::Get,
        &function,
        &authorizer,
        &[blueprint::SCAN_SCOPE],
    )
    .unwrap();
    let identity_pool = b
        .bind_identity_pool(ids::IDENTITY_POOL, &pool, &client, false)
        .unwrap();
    let auth = b
        .create_trusted_role(ids::AUTHENTICATED_ROLE, &identity_pool, AuthState::Authenticated)
        .unwrap();
    let unauth = b
        .create_trusted_role(
            ids::UNAUTHENTICATED_ROLE,
            &identity_pool,
            AuthState::Unauthenticated,
        )
        .unwrap();
    b.attach_roles(ids::ATTACHMENT, &identity_pool, &auth, &unauth)
        .unwrap();
    b.add_domain(&pool, ids::DOMAIN, &config.domain_prefix)
        .unwrap();
    b.bucket(ids::BUCKET).unwrap();
    b.grant(&function, &table, &["dynamodb:*"]).unwrap();

    let graph = b.finalize().unwrap();
    assert_eq!(graph, reference());
}

#[test]
fn test_topological_order_covers_graph() {
    let graph = reference();
    let order = graph.topological_order().unwrap();
    assert_eq!(order.len(), graph.len());

    let position = |id: &str| order.iter().position(|r| r.logical_id == id).unwrap();
    for resource in &order {
        for dependency in &resource.depends_on {
            assert!(position(dependency) < position(&resource.logical_id));
        }
    }
    assert!(position(ids::TABLE) < position(ids::FUNCTION));
    assert!(position(ids::IDENTITY_POOL) < position(ids::ATTACHMENT));
    assert!(position(ids::AUTHORIZER) < position("myRestApiscanGET"));
}

#[test]
fn test_exactly_one_role_per_auth_state() {
    let graph = reference();
    let (pool_resource, _) = graph.identity_pools().next().unwrap();
    let pool_id = pool_resource.physical_id.clone();

    let authenticated = FederatedClaims::authenticated(
        pool_id.clone(),
        ["cognito-idp.us-east-1.amazonaws.com/pool"],
    );
    let unauthenticated = FederatedClaims::unauthenticated(pool_id.clone());

    for claims in [&authenticated, &unauthenticated] {
        let assumable: Vec<&str> = graph
            .roles()
            .filter(|(_, role)| {
                role.assumed_by
                    .trust_condition()
                    .is_some_and(|c| c.is_satisfied_by(claims))
            })
            .map(|(r, _)| r.logical_id.as_str())
            .collect();
        assert_eq!(assumable.len(), 1, "{:?}", claims);
    }

    let foreign = FederatedClaims::authenticated("us-east-1:other", Vec::<String>::new());
    assert!(!graph.roles().any(|(_, role)| role
        .assumed_by
        .trust_condition()
        .is_some_and(|c| c.is_satisfied_by(&foreign))));
}

#[test]
fn test_trusted_roles_cannot_touch_table() {
    let graph = reference();
    let engine = PolicyEngine::new();
    let (table, _) = graph.tables().next().unwrap();

    for statement in graph.federated_statements() {
        assert!(!statement.mentions_resource(&table.arn));
    }

    for state in AuthState::ALL {
        let (role_resource, role) = graph.attached_role(ids::IDENTITY_POOL, state).unwrap();
        let principal = Principal::role(&role_resource.arn);
        for action in ["dynamodb:Scan", "dynamodb:GetItem", "dynamodb:PutItem"] {
            assert!(
                !engine
                    .is_allowed(&principal, action, &table.arn, &role.statements)
                    .unwrap(),
                "{} may {}",
                role_resource.logical_id,
                action
            );
        }
    }

    let (role_resource, role) = graph.execution_role(ids::FUNCTION).unwrap();
    assert!(engine
        .is_allowed(
            &Principal::role(&role_resource.arn),
            "dynamodb:Scan",
            &table.arn,
            &role.statements
        )
        .unwrap());
}

#[test]
fn test_authenticated_role_has_identity_access_only_when_authenticated() {
    let graph = reference();
    let engine = PolicyEngine::new();

    let (auth, auth_role) = graph
        .attached_role(ids::IDENTITY_POOL, AuthState::Authenticated)
        .unwrap();
    let (unauth, unauth_role) = graph
        .attached_role(ids::IDENTITY_POOL, AuthState::Unauthenticated)
        .unwrap();

    assert!(engine
        .is_allowed(
            &Principal::role(&auth.arn),
            "cognito-identity:GetId",
            "*",
            &auth_role.statements
        )
        .unwrap());
    assert!(!engine
        .is_allowed(
            &Principal::role(&unauth.arn),
            "cognito-identity:GetId",
            "*",
            &unauth_role.statements
        )
        .unwrap());
    assert!(engine
        .is_allowed(
            &Principal::role(&unauth.arn),
            "cognito-sync:ListRecords",
            "*",
            &unauth_role.statements
        )
        .unwrap());
}

#[test]
fn test_token_lifetimes_preserved() {
    let graph = reference();
    let (_, client) = graph.clients().next().unwrap();
    let validity = client.token_validity;

    assert_eq!(validity.auth_session().as_secs(), 15 * 60);
    assert_eq!(validity.id_token().as_secs(), 60 * 60);
    assert_eq!(validity.access_token().as_secs(), 30 * 60);
    assert_eq!(validity.refresh_token().as_secs(), 30 * 24 * 60 * 60);
}

#[test]
fn test_serialized_graph_reloads() {
    let graph = reference();
    let json = graph.to_json().unwrap();
    assert!(json.contains("\"myDynamoDb_table\""));
    assert_eq!(StackGraph::from_json(&json).unwrap(), graph);
    assert!(graph.to_yaml().unwrap().contains("myRestApiscanGET"));
}
