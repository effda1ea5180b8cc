//! REST implementation of [`EntityAdapter`].
//!
//! Routes, relative to the configured base URL:
//! - `GET    /api/{collection}`
//! - `POST   /api/{collection}`
//! - `PUT    /api/{collection}/{id}`
//! - `DELETE /api/{collection}/{id}`
//!
//! Records travel as `{ "id", "updated_at", "images": [..], ...fields }`.
//! Asset-bearing types are pushed as `multipart/form-data` with a `data`
//! JSON part, a `keep_images` JSON part and one `images` part per upload.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;

use super::{EntityAdapter, PushAck, ServerRecord};
use crate::assets::AssetPayload;
use crate::error::AdapterError;
use crate::models::{ActorContext, Entity};

#[derive(Debug, Deserialize)]
struct WireRecord<E> {
    id: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(flatten)]
    fields: E,
}

/// HTTP client for one entity collection.
#[derive(Debug, Clone)]
pub struct HttpEntityAdapter<E> {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> HttpEntityAdapter<E> {
    /// Creates an adapter for `E`'s default collection.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AdapterError::Misconfigured(format!(
                "server URL must start with http:// or https://, got '{}'",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Misconfigured(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            collection: E::ENTITY_TYPE.collection().to_string(),
            api_key,
            _entity: PhantomData,
        })
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}/api/{}", self.base_url, self.collection)
    }

    fn item_url(&self, server_id: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.base_url,
            self.collection,
            urlencoding::encode(server_id)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Attaches the fields (and assets, for asset-bearing types) to a push.
    fn with_body(
        &self,
        request: RequestBuilder,
        fields: &E,
        assets: &AssetPayload,
    ) -> Result<RequestBuilder, AdapterError> {
        if !E::ENTITY_TYPE.has_assets() {
            return Ok(request.json(fields));
        }

        let data = serde_json::to_string(fields)
            .map_err(|e| AdapterError::Misconfigured(format!("cannot encode fields: {}", e)))?;
        let keep = serde_json::to_string(&assets.keep)
            .map_err(|e| AdapterError::Misconfigured(format!("cannot encode references: {}", e)))?;

        let mut form = Form::new().text("data", data).text("keep_images", keep);
        for upload in &assets.uploads {
            let part = Part::bytes(upload.bytes.clone()).file_name(upload.filename.clone());
            let part = match part.mime_str(&upload.content_type) {
                Ok(part) => part,
                Err(_) => Part::bytes(upload.bytes.clone())
                    .file_name(upload.filename.clone())
                    .mime_str("application/octet-stream")
                    .map_err(|e| AdapterError::Misconfigured(e.to_string()))?,
            };
            form = form.part("images", part);
        }

        Ok(request.multipart(form))
    }

    async fn push(&self, request: RequestBuilder) -> Result<PushAck, AdapterError> {
        let response = send(request).await?;
        let record: WireRecord<E> = decode(response).await?;
        Ok(PushAck {
            server_id: record.id,
            updated_at: record.updated_at,
            asset_refs: record.images,
        })
    }
}

#[async_trait]
impl<E: Entity> EntityAdapter for HttpEntityAdapter<E> {
    type Entity = E;

    async fn create(&self, fields: &E, assets: &AssetPayload) -> Result<PushAck, AdapterError> {
        let request = self.authorize(self.client.post(self.collection_url()));
        let request = self.with_body(request, fields, assets)?;
        self.push(request).await
    }

    async fn update(
        &self,
        server_id: &str,
        fields: &E,
        assets: &AssetPayload,
    ) -> Result<PushAck, AdapterError> {
        let request = self.authorize(self.client.put(self.item_url(server_id)));
        let request = self.with_body(request, fields, assets)?;
        self.push(request).await
    }

    async fn delete(&self, server_id: &str, actor: &ActorContext) -> Result<(), AdapterError> {
        let request = self
            .authorize(self.client.delete(self.item_url(server_id)))
            .json(actor);

        match send(request).await {
            Ok(_) => Ok(()),
            // Already gone upstream
            Err(AdapterError::Rejected { status: 404, .. }) => {
                tracing::debug!(server_id, "Delete target already absent on server");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<ServerRecord<E>>, AdapterError> {
        let request = self.authorize(self.client.get(self.collection_url()));
        let response = send(request).await?;
        let records: Vec<WireRecord<E>> = decode(response).await?;

        Ok(records
            .into_iter()
            .map(|r| ServerRecord {
                server_id: r.id,
                fields: r.fields,
                updated_at: r.updated_at,
                asset_refs: r.images,
            })
            .collect())
    }
}

async fn send(request: RequestBuilder) -> Result<Response, AdapterError> {
    let response = request.send().await.map_err(|e| {
        if e.is_builder() {
            AdapterError::Misconfigured(e.to_string())
        } else {
            AdapterError::Transient(e.to_string())
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(AdapterError::Transient(format!("{}: {}", status, message)))
    } else {
        Err(AdapterError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, AdapterError> {
    let body = response
        .text()
        .await
        .map_err(|e| AdapterError::Transient(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| AdapterError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetUpload;
    use crate::models::{Category, Product};
    use axum::extract::{Multipart, Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    const UPDATED_AT: &str = "2025-03-01T10:00:00Z";

    #[derive(Default)]
    struct Captured {
        auth: Vec<Option<String>>,
        bodies: Vec<Value>,
        parts: Vec<(String, Option<String>, Vec<u8>)>,
        deletes: Vec<(String, Value)>,
    }

    type Shared = Arc<Mutex<Captured>>;

    async fn list_categories() -> Json<Value> {
        Json(json!([
            {"id": "srv-1", "updated_at": UPDATED_AT, "name": "Tools", "description": null},
            {"id": "srv-2", "updated_at": UPDATED_AT, "name": "Paint", "description": "Indoor"}
        ]))
    }

    async fn create_category(
        State(shared): State<Shared>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let mut captured = shared.lock().unwrap();
        captured.auth.push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
        captured.bodies.push(body.clone());

        let mut record = body;
        record["id"] = json!("srv-7");
        record["updated_at"] = json!(UPDATED_AT);
        Json(record)
    }

    async fn update_category(Path(id): Path<String>, Json(body): Json<Value>) -> AxumResponse {
        match id.as_str() {
            "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "db down").into_response(),
            "invalid" => (StatusCode::UNPROCESSABLE_ENTITY, "name is required").into_response(),
            "garbled" => (StatusCode::OK, "not json").into_response(),
            _ => {
                let mut record = body;
                record["id"] = json!(id);
                record["updated_at"] = json!(UPDATED_AT);
                Json(record).into_response()
            }
        }
    }

    async fn delete_category(
        State(shared): State<Shared>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if id == "gone" {
            return StatusCode::NOT_FOUND;
        }
        shared.lock().unwrap().deletes.push((id, body));
        StatusCode::NO_CONTENT
    }

    async fn create_product(State(shared): State<Shared>, mut multipart: Multipart) -> Json<Value> {
        let mut data = json!({});
        let mut images: Vec<String> = Vec::new();
        let mut uploaded: Vec<String> = Vec::new();

        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.unwrap().to_vec();

            match name.as_str() {
                "data" => data = serde_json::from_slice(&bytes).unwrap(),
                "keep_images" => images = serde_json::from_slice(&bytes).unwrap(),
                "images" => {
                    uploaded.push(format!(
                        "https://cdn.example.com/{}",
                        file_name.clone().unwrap_or_default()
                    ));
                }
                _ => {}
            }
            shared.lock().unwrap().parts.push((name, file_name, bytes));
        }

        images.extend(uploaded);
        data["id"] = json!("srv-p1");
        data["updated_at"] = json!(UPDATED_AT);
        data["images"] = json!(images);
        Json(data)
    }

    async fn spawn_server() -> (String, Shared) {
        let shared = Shared::default();
        let app = Router::new()
            .route("/api/categories", get(list_categories).post(create_category))
            .route(
                "/api/categories/{id}",
                put(update_category).delete(delete_category),
            )
            .route("/api/products", post(create_product))
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), shared)
    }

    fn category_adapter(base_url: &str) -> HttpEntityAdapter<Category> {
        HttpEntityAdapter::new(
            base_url,
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_url_without_scheme() {
        let result =
            HttpEntityAdapter::<Category>::new("example.com", None, Duration::from_secs(1));
        assert!(matches!(result, Err(AdapterError::Misconfigured(_))));
    }

    #[test]
    fn test_item_url_encodes_server_id() {
        let adapter = category_adapter("http://localhost:8080/");
        assert_eq!(adapter.base_url(), "http://localhost:8080");
        assert_eq!(
            adapter.item_url("a b/c"),
            "http://localhost:8080/api/categories/a%20b%2Fc"
        );
    }

    #[tokio::test]
    async fn test_list_decodes_wire_records() {
        let (url, _shared) = spawn_server().await;
        let records = category_adapter(&url).list().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].server_id, "srv-1");
        assert_eq!(records[0].fields, Category::new("Tools"));
        assert_eq!(
            records[1].fields,
            Category::new("Paint").with_description("Indoor")
        );
        assert_eq!(records[0].updated_at.to_rfc3339(), "2025-03-01T10:00:00+00:00");
        assert!(records[0].asset_refs.is_empty());
    }

    #[tokio::test]
    async fn test_create_sends_json_with_bearer_token() {
        let (url, shared) = spawn_server().await;
        let ack = category_adapter(&url)
            .create(&Category::new("Tools"), &AssetPayload::empty())
            .await
            .unwrap();

        assert_eq!(ack.server_id, "srv-7");
        let captured = shared.lock().unwrap();
        assert_eq!(captured.auth, vec![Some("Bearer secret".to_string())]);
        assert_eq!(captured.bodies[0]["name"], "Tools");
    }

    #[tokio::test]
    async fn test_update_error_mapping() {
        let (url, _shared) = spawn_server().await;
        let adapter = category_adapter(&url);
        let payload = AssetPayload::empty();
        let fields = Category::new("Tools");

        let ack = adapter.update("srv-3", &fields, &payload).await.unwrap();
        assert_eq!(ack.server_id, "srv-3");

        let err = adapter.update("broken", &fields, &payload).await.unwrap_err();
        assert!(matches!(err, AdapterError::Transient(_)));

        let err = adapter.update("invalid", &fields, &payload).await.unwrap_err();
        assert_eq!(
            err,
            AdapterError::Rejected {
                status: 422,
                message: "name is required".to_string()
            }
        );

        let err = adapter.update("garbled", &fields, &payload).await.unwrap_err();
        assert!(matches!(err, AdapterError::Decode(_)));
    }

    #[tokio::test]
    async fn test_delete_forwards_actor_and_tolerates_missing() {
        let (url, shared) = spawn_server().await;
        let adapter = category_adapter(&url);
        let actor = ActorContext::new("u1").with_name("Alex");

        adapter.delete("srv-1", &actor).await.unwrap();
        adapter.delete("gone", &actor).await.unwrap();

        let captured = shared.lock().unwrap();
        assert_eq!(captured.deletes.len(), 1);
        assert_eq!(captured.deletes[0].0, "srv-1");
        assert_eq!(captured.deletes[0].1["actor_name"], "Alex");
    }

    #[tokio::test]
    async fn test_product_push_is_multipart_with_ordered_images() {
        let (url, shared) = spawn_server().await;
        let adapter: HttpEntityAdapter<Product> =
            HttpEntityAdapter::new(&url, None, Duration::from_secs(5)).unwrap();

        let payload = AssetPayload {
            keep: vec!["https://cdn.example.com/kept.png".to_string()],
            uploads: vec![
                AssetUpload {
                    asset_local_id: "as-1".to_string(),
                    bytes: vec![1, 2, 3],
                    content_type: "image/png".to_string(),
                    filename: "front.png".to_string(),
                },
                AssetUpload {
                    asset_local_id: "as-2".to_string(),
                    bytes: vec![4],
                    content_type: "image/jpeg".to_string(),
                    filename: "back.jpg".to_string(),
                },
            ],
        };

        let ack = adapter
            .create(&Product::new("Hammer", 9.5), &payload)
            .await
            .unwrap();

        assert_eq!(ack.server_id, "srv-p1");
        assert_eq!(
            ack.asset_refs,
            vec![
                "https://cdn.example.com/kept.png",
                "https://cdn.example.com/front.png",
                "https://cdn.example.com/back.jpg",
            ]
        );

        let captured = shared.lock().unwrap();
        let names: Vec<&str> = captured.parts.iter().map(|p| p.0.as_str()).collect();
        assert_eq!(names, vec!["data", "keep_images", "images", "images"]);
        assert_eq!(captured.parts[2].1.as_deref(), Some("front.png"));
        assert_eq!(captured.parts[2].2, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = category_adapter(&format!("http://{}", addr))
            .list()
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
