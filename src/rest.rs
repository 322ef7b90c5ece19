//! Blocking client for a PostgREST-style backend (Supabase REST API).
//!
//! Tables: `pet_data` (one row per user), `shop_items`, `purchased_items`.
//! RPCs: `purchase_item`, `seed_shop_items`.

use crate::model::{PetRecord, PurchasedItem, RawPet, ShopItem, UserId};
use crate::remote::{RemoteError, RemoteStore};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct PostgrestStore {
    client: Client,
    base: String,
    api_key: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct PurchaseReply {
    coins: i64,
    purchased_at: DateTime<Utc>,
}

impl PostgrestStore {
    pub fn new(
        url: &str,
        api_key: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: api_key.into(),
            access_token,
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> RequestBuilder {
        self.authed(self.client.get(format!("{}/{path}", self.base)).query(query))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.post(format!("{}/{path}", self.base)))
    }

    fn patch(&self, path: &str, query: &[(&str, String)]) -> RequestBuilder {
        self.authed(self.client.patch(format!("{}/{path}", self.base)).query(query))
    }
}

fn send(req: RequestBuilder) -> Result<Response, RemoteError> {
    let resp = req
        .send()
        .map_err(|e| RemoteError::Connection(e.to_string()))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body: Option<PostgrestError> = resp.json().ok();
    let code = body
        .as_ref()
        .and_then(|b| b.code.clone())
        .unwrap_or_else(|| status.as_u16().to_string());
    let message = body
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized(message),
        StatusCode::FORBIDDEN => RemoteError::Forbidden(message),
        StatusCode::NOT_FOUND if code == "PGRST202" => RemoteError::Unsupported,
        _ if code == "42501" => RemoteError::Forbidden(message),
        _ if code == "PGRST301" || message.contains("JWT") => RemoteError::Unauthorized(message),
        _ => RemoteError::Rejected { code, message },
    })
}

fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    resp.json().map_err(|e| RemoteError::Decode(e.to_string()))
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

impl RemoteStore for PostgrestStore {
    fn fetch_pet(&self, user: &UserId) -> Result<Option<RawPet>, RemoteError> {
        let resp = send(self.get(
            "pet_data",
            &[("user_id", eq(user.as_str())), ("select", "*".into())],
        ))?;
        let rows: Vec<RawPet> = decode(resp)?;
        Ok(rows.into_iter().next())
    }

    fn upsert_pet(&self, _user: &UserId, record: &PetRecord) -> Result<(), RemoteError> {
        send(
            self.post("pet_data")
                .query(&[("on_conflict", "user_id")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(record),
        )?;
        Ok(())
    }

    fn active_items(&self) -> Result<Vec<ShopItem>, RemoteError> {
        let resp = send(self.get(
            "shop_items",
            &[
                ("is_active", "eq.true".into()),
                ("order", "cost.asc".into()),
                ("select", "*".into()),
            ],
        ))?;
        decode(resp)
    }

    fn seed_items(&self) -> Result<(), RemoteError> {
        send(self.post("rpc/seed_shop_items").json(&json!({})))?;
        Ok(())
    }

    fn purchases(&self, user: &UserId) -> Result<Vec<PurchasedItem>, RemoteError> {
        let resp = send(self.get(
            "purchased_items",
            &[
                ("user_id", eq(user.as_str())),
                ("select", "item_id,purchased_at,is_equipped".into()),
            ],
        ))?;
        decode(resp)
    }

    fn insert_purchase(&self, user: &UserId, item: &PurchasedItem) -> Result<(), RemoteError> {
        send(
            self.post("purchased_items")
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "user_id": user.as_str(),
                    "item_id": item.item_id,
                    "purchased_at": item.purchased_at,
                    "is_equipped": item.is_equipped,
                })),
        )?;
        Ok(())
    }

    fn set_equipped(
        &self,
        user: &UserId,
        item_id: &str,
        equipped: bool,
    ) -> Result<(), RemoteError> {
        send(
            self.patch(
                "purchased_items",
                &[("user_id", eq(user.as_str())), ("item_id", eq(item_id))],
            )
            .header("Prefer", "return=minimal")
            .json(&json!({ "is_equipped": equipped })),
        )?;
        Ok(())
    }

    fn purchase_atomic(
        &self,
        user: &UserId,
        item: &ShopItem,
        at: DateTime<Utc>,
    ) -> Result<(u64, PurchasedItem), RemoteError> {
        let resp = send(self.post("rpc/purchase_item").json(&json!({
            "p_user_id": user.as_str(),
            "p_item_id": item.id,
            "p_purchased_at": at,
        })))?;
        let reply: PurchaseReply = decode(resp)?;
        Ok((
            u64::try_from(reply.coins).unwrap_or(0),
            PurchasedItem {
                item_id: item.id.clone(),
                purchased_at: reply.purchased_at,
                is_equipped: false,
            },
        ))
    }
}
