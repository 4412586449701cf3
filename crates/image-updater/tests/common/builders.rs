#![allow(dead_code)]

use image_updater::event::{PushDetail, PushEvent};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "ap-northeast-1";

/// Single rule routing `team/app/service` pushes to
/// `org/repo/team/app/service/<env>/overlays`.
pub const RULES: &str = r#"
- allowImageTag: "regexp:^v[0-9]+$"
  denyImageTag: "v0"
  registryURI: "*/$1/$2/$3"
  gitHubRepository: "org/repo/$1/$2/$3/$env/overlays"
  region: ap-northeast-1
  env:
    "123456789012": dev
"#;

pub fn push_event(repository: &str, tag: &str) -> PushEvent {
    PushEvent {
        account: ACCOUNT.to_string(),
        region: REGION.to_string(),
        detail_type: "ECR Image Action".to_string(),
        source: "aws.ecr".to_string(),
        detail: PushDetail {
            repository_name: repository.to_string(),
            image_tag: tag.to_string(),
            result: "SUCCESS".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn push_event_json(repository: &str, tag: &str) -> Vec<u8> {
    serde_json::to_vec(&push_event(repository, tag)).expect("event serializes")
}

pub fn image_name(repository: &str) -> String {
    format!("{}.dkr.ecr.{}.amazonaws.com/{}", ACCOUNT, REGION, repository)
}

pub fn kustomization(repository: &str, tag: &str) -> String {
    format!(
        "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n- ../base\nimages:\n- name: {}\n  newTag: {}\n",
        image_name(repository),
        tag
    )
}
