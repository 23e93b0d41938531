// IAM role discovery
// Lists roles visible to the credential and weighs their attached managed
// policies so blocked flows can point at concrete escalation candidates

use crate::aws::AwsInvoker;
use crate::catalog::OperationSpec;
use crate::invoker::ProbeContext;
use crate::models::DiscoveredRole;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const ROLE_LIMIT: usize = 25;
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(6);

lazy_static! {
    static ref MEMBER_RE: Regex = Regex::new(r"(?s)<member>(.*?)</member>").unwrap();
    static ref ROLE_NAME_RE: Regex = Regex::new(r"<RoleName>([^<]+)</RoleName>").unwrap();
    static ref ROLE_ARN_RE: Regex = Regex::new(r"<Arn>([^<]+)</Arn>").unwrap();
    static ref POLICY_ARN_RE: Regex = Regex::new(r"<PolicyArn>([^<]+)</PolicyArn>").unwrap();
}

pub struct AwsRoleDiscovery {
    invoker: Arc<AwsInvoker>,
    /// Managed-policy name fragments and the escalation weight each one
    /// contributes when attached.
    policy_weights: BTreeMap<String, u32>,
}

impl AwsRoleDiscovery {
    pub fn new(invoker: Arc<AwsInvoker>, policy_weights: BTreeMap<String, u32>) -> Self {
        Self {
            invoker,
            policy_weights,
        }
    }

    async fn list_roles(&self, ctx: &ProbeContext) -> Option<Vec<(String, String)>> {
        let op = OperationSpec::synthetic_query(
            "iam_list_roles_discovery",
            "iam",
            "ListRoles",
            &[("MaxItems", "25")],
        );
        let resp = match timeout(DISCOVERY_TIMEOUT, self.invoker.execute(&op, ctx)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                debug!(error = %e, "role listing failed");
                return None;
            }
            Err(_) => {
                debug!("role listing timed out");
                return None;
            }
        };
        if !(200..300).contains(&resp.status) {
            debug!(
                status = resp.status,
                code = resp.error_code.as_deref().unwrap_or("-"),
                "role listing refused"
            );
            return None;
        }
        Some(parse_role_listing(&resp.body))
    }

    async fn attached_policies(&self, ctx: &ProbeContext, role_name: &str) -> Vec<String> {
        let op = OperationSpec::synthetic_query(
            "iam_list_attached_role_policies_discovery",
            "iam",
            "ListAttachedRolePolicies",
            &[("RoleName", role_name)],
        );
        let resp = match timeout(DISCOVERY_TIMEOUT, self.invoker.execute(&op, ctx)).await {
            Ok(Ok(resp)) if (200..300).contains(&resp.status) => resp,
            Ok(Ok(resp)) => {
                debug!(role = role_name, status = resp.status, "policy listing refused");
                return Vec::new();
            }
            Ok(Err(e)) => {
                debug!(role = role_name, error = %e, "policy listing failed");
                return Vec::new();
            }
            Err(_) => {
                debug!(role = role_name, "policy listing timed out");
                return Vec::new();
            }
        };
        parse_policy_arns(&resp.body)
    }

    fn weigh(&self, attached: &[String]) -> u32 {
        self.policy_weights
            .iter()
            .filter(|(fragment, _)| attached.iter().any(|arn| arn.contains(fragment.as_str())))
            .map(|(_, weight)| *weight)
            .sum()
    }

    /// List roles visible to the credential and weigh each one's attached
    /// managed policies. `None` means the listing itself was refused or
    /// unreachable; flow analysis then simply sees no candidates.
    pub async fn discover(&self, ctx: &ProbeContext) -> Option<Vec<DiscoveredRole>> {
        let listed = self.list_roles(ctx).await?;
        debug!(count = listed.len(), "roles visible");
        let mut discovered = Vec::with_capacity(listed.len());
        for (role_name, arn) in listed {
            let attached = self.attached_policies(ctx, &role_name).await;
            let weight = self.weigh(&attached);
            discovered.push(DiscoveredRole {
                role_name,
                arn,
                attached_policies: attached,
                weight,
            });
        }
        discovered.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then_with(|| a.role_name.cmp(&b.role_name))
        });
        Some(discovered)
    }
}

/// Pull `(RoleName, Arn)` pairs out of a ListRoles response, capped at
/// ROLE_LIMIT. Malformed member blocks are skipped.
fn parse_role_listing(body: &str) -> Vec<(String, String)> {
    let mut roles = Vec::new();
    for member in MEMBER_RE.captures_iter(body) {
        let block = &member[1];
        let name = ROLE_NAME_RE.captures(block).map(|c| c[1].to_string());
        let arn = ROLE_ARN_RE.captures(block).map(|c| c[1].to_string());
        if let (Some(name), Some(arn)) = (name, arn) {
            roles.push((name, arn));
        }
        if roles.len() >= ROLE_LIMIT {
            break;
        }
    }
    roles
}

fn parse_policy_arns(body: &str) -> Vec<String> {
    POLICY_ARN_RE
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    const LIST_ROLES_BODY: &str = r#"<ListRolesResponse>
  <ListRolesResult>
    <Roles>
      <member>
        <Path>/</Path>
        <RoleName>deploy-role</RoleName>
        <Arn>arn:aws:iam::123456789012:role/deploy-role</Arn>
      </member>
      <member>
        <Path>/service-role/</Path>
        <RoleName>lambda-exec</RoleName>
        <Arn>arn:aws:iam::123456789012:role/service-role/lambda-exec</Arn>
      </member>
      <member>
        <Path>/</Path>
      </member>
    </Roles>
  </ListRolesResult>
</ListRolesResponse>"#;

    #[test]
    fn role_listing_extracts_name_and_arn_pairs() {
        let roles = parse_role_listing(LIST_ROLES_BODY);
        assert_eq!(
            roles,
            vec![
                (
                    "deploy-role".to_string(),
                    "arn:aws:iam::123456789012:role/deploy-role".to_string()
                ),
                (
                    "lambda-exec".to_string(),
                    "arn:aws:iam::123456789012:role/service-role/lambda-exec".to_string()
                ),
            ]
        );
    }

    #[test]
    fn role_listing_is_capped() {
        let mut body = String::from("<Roles>");
        for i in 0..40 {
            body.push_str(&format!(
                "<member><RoleName>role-{i}</RoleName><Arn>arn:aws:iam::123456789012:role/role-{i}</Arn></member>"
            ));
        }
        body.push_str("</Roles>");
        assert_eq!(parse_role_listing(&body).len(), ROLE_LIMIT);
    }

    #[test]
    fn policy_arns_are_collected() {
        let body = r#"<ListAttachedRolePoliciesResponse>
  <ListAttachedRolePoliciesResult>
    <AttachedPolicies>
      <member>
        <PolicyName>AdministratorAccess</PolicyName>
        <PolicyArn>arn:aws:iam::aws:policy/AdministratorAccess</PolicyArn>
      </member>
      <member>
        <PolicyName>ReadOnlyAccess</PolicyName>
        <PolicyArn>arn:aws:iam::aws:policy/ReadOnlyAccess</PolicyArn>
      </member>
    </AttachedPolicies>
  </ListAttachedRolePoliciesResult>
</ListAttachedRolePoliciesResponse>"#;
        assert_eq!(
            parse_policy_arns(body),
            vec![
                "arn:aws:iam::aws:policy/AdministratorAccess".to_string(),
                "arn:aws:iam::aws:policy/ReadOnlyAccess".to_string(),
            ]
        );
    }

    #[test]
    fn weights_sum_once_per_matching_fragment() {
        let catalog = Catalog::embedded().unwrap();
        let invoker = Arc::new(AwsInvoker::new(&catalog).unwrap());
        let mut weights = BTreeMap::new();
        weights.insert("AdministratorAccess".to_string(), 100);
        weights.insert("IAMFullAccess".to_string(), 90);
        weights.insert("AmazonS3FullAccess".to_string(), 60);
        let discovery = AwsRoleDiscovery::new(invoker, weights);

        let attached = vec![
            "arn:aws:iam::aws:policy/AdministratorAccess".to_string(),
            "arn:aws:iam::aws:policy/AmazonS3FullAccess".to_string(),
            // A second ARN containing the same fragment does not double it.
            "arn:aws:iam::123456789012:policy/custom-AmazonS3FullAccess".to_string(),
        ];
        assert_eq!(discovery.weigh(&attached), 160);
        assert_eq!(discovery.weigh(&[]), 0);
    }
}
