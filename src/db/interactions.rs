use crate::db::{Db, DnsInteraction, HttpInteraction, Interaction};
use crate::error::Error;
use crate::events::{InteractionDraft, Kind};

impl Db {
    /// Persist an interaction draft and return the new interaction id.
    ///
    /// The base row and the kind-specific detail row are inserted in one
    /// transaction. Drafts without a resolved token id are not persisted and
    /// yield `None`.
    pub async fn create_interaction(
        &self,
        draft: &InteractionDraft,
    ) -> Result<Option<i64>, Error> {
        let Some(token_id) = draft.token_id else {
            return Ok(None);
        };
        let kind = draft.kind.map(|k| k.as_str()).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO interactions (token_id, kind, occurred_at, remote_ip, remote_port, tls, summary)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(token_id)
        .bind(kind)
        .bind(draft.occurred_at)
        .bind(&draft.remote_ip)
        .bind(i64::from(draft.remote_port))
        .bind(draft.tls)
        .bind(&draft.summary)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        match draft.kind {
            Some(Kind::Http) => {
                if let Some(http) = &draft.http {
                    let headers = serde_json::to_string(&http.headers)?;
                    sqlx::query(
                        "INSERT INTO http_interactions
                         (interaction_id, method, scheme, host, path, query, http_version, request_headers, request_body)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(id)
                    .bind(&http.method)
                    .bind(&http.scheme)
                    .bind(&http.host)
                    .bind(&http.path)
                    .bind(&http.query)
                    .bind(&http.proto)
                    .bind(headers)
                    .bind(&http.body)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            Some(Kind::Dns) => {
                if let Some(dns) = &draft.dns {
                    sqlx::query(
                        "INSERT INTO dns_interactions
                         (interaction_id, qname, qtype, qclass, rd, opcode, dns_id, protocol)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(id)
                    .bind(&dns.qname)
                    .bind(i64::from(dns.qtype))
                    .bind(i64::from(dns.qclass))
                    .bind(i64::from(dns.rd))
                    .bind(i64::from(dns.opcode))
                    .bind(i64::from(dns.dns_id))
                    .bind(&dns.protocol)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            None => {}
        }

        tx.commit().await?;
        Ok(Some(id))
    }

    /// Interactions for a token, newest first.
    pub async fn get_interactions_by_token(
        &self,
        token_id: i64,
    ) -> Result<Vec<Interaction>, Error> {
        let rows = sqlx::query_as::<_, Interaction>(
            "SELECT id, token_id, kind, occurred_at, remote_ip, remote_port, tls, summary
             FROM interactions WHERE token_id = ? ORDER BY occurred_at DESC, id DESC",
        )
        .bind(token_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_http_interaction(
        &self,
        interaction_id: i64,
    ) -> Result<Option<HttpInteraction>, Error> {
        let row = sqlx::query_as::<_, HttpInteraction>(
            "SELECT interaction_id, method, scheme, host, path, query, http_version, request_headers, request_body
             FROM http_interactions WHERE interaction_id = ?",
        )
        .bind(interaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_dns_interaction(
        &self,
        interaction_id: i64,
    ) -> Result<Option<DnsInteraction>, Error> {
        let row = sqlx::query_as::<_, DnsInteraction>(
            "SELECT interaction_id, qname, qtype, qclass, rd, opcode, dns_id, protocol
             FROM dns_interactions WHERE interaction_id = ?",
        )
        .bind(interaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
