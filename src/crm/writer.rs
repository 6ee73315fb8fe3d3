use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::CrmWriter;
use crate::common::{ensure_success, is_auth_status, join_url, truncate_for_log};
use crate::error::{PipelineError, Result};
use crate::model::{LicenseRecord, ProviderRecord};

const ADD_USER: &str = r#"
mutation AddUser($data: User_CreateAttributes!) {
  addUser(data: $data) {
    user {
      id
      email
      firstName
      lastName
      phoneNumber
    }
  }
}
"#;

const UPDATE_USER_PROFILE: &str = r#"
mutation UpdateUserProfile($documentData: [Document_CreateAttributes!], $removeDocuments: JSON, $data: UserProfile_UpdateAttributes, $userId: ID!) {
  updateUserProfile(documentData: $documentData, removeDocuments: $removeDocuments, data: $data, userId: $userId) {
    userProfile {
      id
      userId
      npiNumber
      birthDate
    }
  }
}
"#;

const BATCH_CREATE_LICENSES: &str = r#"
mutation BatchCreateLicenses($data: [License_CreateAttributes!]!, $userId: ID!) {
  batchCreateLicenses(data: $data, userId: $userId) {
    success
    licenses {
      id
      state
      licenseNumber
    }
  }
}
"#;

/// Profile fields this service never fills; sent as explicit nulls.
const UNSET_PROFILE_FIELDS: &[&str] = &[
    "middleName",
    "ssn",
    "specialty",
    "subSpecialty",
    "legacySpecialty",
    "gender",
    "address",
    "addressCity",
    "addressState",
    "addressZip",
    "birthPlace",
    "birthCertDocumentId",
    "driversLicenseDocumentId",
    "driversLicenseExpirationDate",
    "driversLicenseNumber",
    "driversLicenseState",
    "passportPhotoId",
    "passportDocumentId",
    "passportExpirationDate",
    "resumeDocumentId",
    "authAndReleaseDocumentId",
    "weight",
    "height",
    "eyeColor",
    "hairColor",
    "ethnicity",
    "usCitizen",
    "citizenship",
    "visaNumber",
    "greenCardNumber",
    "memberOfMilitary",
    "currentActiveDuty",
    "highSchoolName",
    "highSchoolLocation",
    "highSchoolGraduationDate",
    "manager",
];

/// Writes providers through the CRM's admin GraphQL endpoint.
pub struct GraphqlWriter {
    client: Client,
    endpoint: String,
}

impl GraphqlWriter {
    pub fn new(client: Client, api_base: &str) -> Self {
        Self {
            client,
            endpoint: join_url(api_base, "graphql"),
        }
    }

    async fn execute(
        &self,
        token: &str,
        operation_name: &str,
        query: &str,
        variables: Value,
    ) -> Result<Value> {
        tracing::info!("CRM {operation_name}");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&json!({
                "operationName": operation_name,
                "variables": variables,
                "query": query,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::transport("crm", e))?;

        if is_auth_status(resp.status()) {
            return Err(PipelineError::Authentication(format!(
                "CRM rejected the bearer token ({})",
                resp.status()
            )));
        }
        let resp = ensure_success(resp, "crm").await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| PipelineError::transport("crm", e))?;
        graphql_data(body)
    }
}

#[async_trait]
impl CrmWriter for GraphqlWriter {
    async fn create_user(&self, token: &str, provider: &ProviderRecord) -> Result<String> {
        let data = self
            .execute(token, "AddUser", ADD_USER, add_user_variables(provider))
            .await?;
        let id = data
            .pointer("/addUser/user/id")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| PipelineError::ExternalService {
                service: "crm",
                status: None,
                message: "AddUser returned no user id".to_string(),
            })?;
        tracing::info!("Created CRM user {id}");
        Ok(id)
    }

    async fn update_profile(
        &self,
        token: &str,
        user_id: &str,
        provider: &ProviderRecord,
    ) -> Result<()> {
        self.execute(
            token,
            "UpdateUserProfile",
            UPDATE_USER_PROFILE,
            json!({ "userId": user_id, "data": profile_attributes(provider) }),
        )
        .await?;
        Ok(())
    }

    async fn create_licenses(
        &self,
        token: &str,
        user_id: &str,
        licenses: &[LicenseRecord],
    ) -> Result<()> {
        let data = self
            .execute(
                token,
                "BatchCreateLicenses",
                BATCH_CREATE_LICENSES,
                json!({ "userId": user_id, "data": licenses }),
            )
            .await?;
        if data.pointer("/batchCreateLicenses/success") == Some(&Value::Bool(false)) {
            return Err(PipelineError::ExternalService {
                service: "crm",
                status: None,
                message: "BatchCreateLicenses reported success=false".to_string(),
            });
        }
        tracing::info!("Uploaded {} license(s) for CRM user {user_id}", licenses.len());
        Ok(())
    }
}

/// `5551234567` → `(555) 123 - 4567`.
pub fn format_phone(digits: &str) -> String {
    if digits.len() != 10 || !digits.is_ascii() {
        return digits.to_string();
    }
    format!("({}) {} - {}", &digits[0..3], &digits[3..6], &digits[6..])
}

fn add_user_variables(provider: &ProviderRecord) -> Value {
    json!({
        "data": {
            "firstName": provider.first_name,
            "lastName": provider.last_name,
            "email": provider.email,
            "phoneNumber": format_phone(&provider.phone_number),
        }
    })
}

fn profile_attributes(provider: &ProviderRecord) -> Value {
    let mut data = serde_json::Map::new();
    for field in UNSET_PROFILE_FIELDS {
        data.insert(field.to_string(), Value::Null);
    }
    data.insert("firstName".into(), json!(provider.first_name));
    data.insert("lastName".into(), json!(provider.last_name));
    data.insert("professionalType".into(), json!(provider.profession));
    data.insert("npiNumber".into(), json!(provider.npi));
    data.insert("birthDate".into(), json!(provider.birth_date));
    data.insert("otherPhoneNumbers".into(), json!([]));
    data.insert("otherEmails".into(), json!([]));
    data.insert("practiceAddresses".into(), json!([]));
    Value::Object(data)
}

/// GraphQL reports failures inside a 200; surface the first message as an error.
fn graphql_data(body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let message = errors[0]
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| truncate_for_log(&errors[0].to_string()));
            return Err(PipelineError::ExternalService {
                service: "crm",
                status: None,
                message,
            });
        }
    }
    match body.get("data") {
        Some(data) if !data.is_null() => Ok(data.clone()),
        _ => Err(PipelineError::ExternalService {
            service: "crm",
            status: None,
            message: "GraphQL response carried no data".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::testing::spawn_mock;

    fn provider() -> ProviderRecord {
        ProviderRecord::new(
            "Jane",
            Some("Doe".into()),
            "jane@example.com",
            "5551234567",
            "12",
            "1831480821",
            Some("1990-01-02T00:00:00".into()),
        )
        .unwrap()
    }

    #[test]
    fn phone_is_formatted_for_the_crm() {
        assert_eq!(format_phone("5551234567"), "(555) 123 - 4567");
        assert_eq!(format_phone("0000000000"), "(000) 000 - 0000");
    }

    #[test]
    fn add_user_sends_formatted_phone() {
        let vars = add_user_variables(&provider());
        assert_eq!(vars["data"]["phoneNumber"], "(555) 123 - 4567");
        assert_eq!(vars["data"]["lastName"], "Doe");
    }

    #[test]
    fn profile_sets_known_fields_and_nulls_the_rest() {
        let data = profile_attributes(&provider());
        assert_eq!(data["professionalType"], "12");
        assert_eq!(data["npiNumber"], "1831480821");
        assert_eq!(data["birthDate"], "1990-01-02T00:00:00");
        assert!(data["ssn"].is_null());
        assert!(data["manager"].is_null());
        assert_eq!(data["otherEmails"], json!([]));
        let obj = data.as_object().unwrap();
        assert_eq!(obj.len(), UNSET_PROFILE_FIELDS.len() + 8);
    }

    #[test]
    fn embedded_graphql_errors_become_errors() {
        let err = graphql_data(json!({
            "data": null,
            "errors": [{ "message": "Email has already been taken" }]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Email has already been taken"));
    }

    #[test]
    fn data_is_returned_when_no_errors() {
        let data = graphql_data(json!({
            "data": { "addUser": { "user": { "id": "U123" } } }
        }))
        .unwrap();
        assert_eq!(data.pointer("/addUser/user/id").unwrap(), "U123");

        assert!(graphql_data(json!({ "errors": [] })).is_err());
    }

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// A `/graphql` endpoint answering each operation name with a canned reply.
    fn mock_crm(replies: Vec<(&'static str, StatusCode, Value)>, seen: Seen) -> Router {
        let replies = Arc::new(replies);
        Router::new().route(
            "/graphql",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let replies = replies.clone();
                let seen = seen.clone();
                async move {
                    let op = body["operationName"].as_str().unwrap_or_default().to_string();
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push((auth, body));
                    let (_, status, reply) = replies
                        .iter()
                        .find(|(name, ..)| *name == op)
                        .cloned()
                        .unwrap_or(("", StatusCode::BAD_REQUEST, json!({})));
                    (status, Json(reply))
                }
            }),
        )
    }

    async fn writer(replies: Vec<(&'static str, StatusCode, Value)>) -> (GraphqlWriter, Seen) {
        let seen = Seen::default();
        let base = spawn_mock(mock_crm(replies, seen.clone())).await;
        (GraphqlWriter::new(Client::new(), &base), seen)
    }

    fn license() -> LicenseRecord {
        LicenseRecord {
            state: "AL".into(),
            license_number: "MD.50214".into(),
            license_type: "Medical License".into(),
            issue_date: Some("2024-12-05T00:00:00".into()),
            expiration_date: None,
        }
    }

    #[tokio::test]
    async fn create_user_posts_add_user_and_returns_the_id() {
        let (crm, seen) = writer(vec![(
            "AddUser",
            StatusCode::OK,
            json!({ "data": { "addUser": { "user": { "id": "U123" } } } }),
        )])
        .await;

        let id = crm.create_user("crm-token", &provider()).await.unwrap();
        assert_eq!(id, "U123");

        let seen = seen.lock().unwrap();
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer crm-token"));
        assert!(body["query"].as_str().unwrap().contains("mutation AddUser"));
        assert_eq!(body["variables"]["data"]["phoneNumber"], "(555) 123 - 4567");
    }

    #[tokio::test]
    async fn numeric_user_ids_are_accepted() {
        let (crm, _) = writer(vec![(
            "AddUser",
            StatusCode::OK,
            json!({ "data": { "addUser": { "user": { "id": 77 } } } }),
        )])
        .await;
        assert_eq!(crm.create_user("t", &provider()).await.unwrap(), "77");
    }

    #[tokio::test]
    async fn profile_and_licenses_are_written_for_the_user() {
        let (crm, seen) = writer(vec![
            (
                "UpdateUserProfile",
                StatusCode::OK,
                json!({ "data": { "updateUserProfile": { "userProfile": { "id": "P1" } } } }),
            ),
            (
                "BatchCreateLicenses",
                StatusCode::OK,
                json!({ "data": { "batchCreateLicenses": { "success": true, "licenses": [] } } }),
            ),
        ])
        .await;

        crm.update_profile("crm-token", "U123", &provider())
            .await
            .unwrap();
        crm.create_licenses("crm-token", "U123", &[license()])
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["variables"]["userId"], "U123");
        assert_eq!(seen[0].1["variables"]["data"]["npiNumber"], "1831480821");
        let licenses = &seen[1].1["variables"];
        assert_eq!(licenses["userId"], "U123");
        assert_eq!(licenses["data"][0]["licenseType"], "Medical License");
        assert_eq!(licenses["data"][0]["state"], "AL");
    }

    #[tokio::test]
    async fn unsuccessful_batch_is_an_error() {
        let (crm, _) = writer(vec![(
            "BatchCreateLicenses",
            StatusCode::OK,
            json!({ "data": { "batchCreateLicenses": { "success": false, "licenses": [] } } }),
        )])
        .await;

        let err = crm
            .create_licenses("crm-token", "U123", &[license()])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalService { .. }));
        assert!(err.to_string().contains("success=false"));
    }

    #[tokio::test]
    async fn graphql_errors_in_a_200_fail_the_profile_update() {
        let (crm, _) = writer(vec![(
            "UpdateUserProfile",
            StatusCode::OK,
            json!({ "data": null, "errors": [{ "message": "NPI is invalid" }] }),
        )])
        .await;

        let err = crm
            .update_profile("crm-token", "U123", &provider())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("NPI is invalid"));
    }

    #[tokio::test]
    async fn http_failures_are_classified() {
        let (crm, _) = writer(vec![(
            "AddUser",
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "message": "boom" }),
        )])
        .await;
        match crm.create_user("crm-token", &provider()).await.unwrap_err() {
            PipelineError::ExternalService { service, status, .. } => {
                assert_eq!(service, "crm");
                assert_eq!(status, Some(500));
            }
            other => panic!("unexpected error: {other}"),
        }

        let (crm, _) = writer(vec![("AddUser", StatusCode::UNAUTHORIZED, json!({}))]).await;
        let err = crm.create_user("expired", &provider()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Authentication(_)));
    }
}
