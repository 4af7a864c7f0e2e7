use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{Organization, Role};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    #[schema(example = "Acme Corp")]
    pub name: String,

    #[schema(example = "acme")]
    pub slug: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateMemberRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrganizationResponse {
    #[serde(flatten)]
    pub organization: Organization,
    pub role: Role,
}
