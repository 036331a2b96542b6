//! `ldap3`-backed directory client.
//!
//! One [`Ldap3Directory`] owns one connection. The `ldap3` handle is
//! cloneable and multiplexes concurrent operations over that connection,
//! so searches run in parallel while binds are serialized by a mutex.
//!
//! Paging is driven by hand with the simple paged results control: a page
//! ends when the server's search result carries a non-empty cookie, and the
//! next page is only requested when the consumer pulls again. Between pages
//! no request is outstanding, so cancelling there sends a zero-size page
//! request with the last cookie instead of an abandon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::{ControlType, PagedResults, RawControl};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchStream};
use orgsync_core::client::RESULT_SUCCESS;
use orgsync_core::{
    Control, DirectoryClient, DirectoryEntry, MessageId, OrgSyncResult, SearchEvent, SearchEvents, SearchOutcome,
    SearchRequest, SearchScope,
};
use tokio::sync::Mutex;

use crate::config::OrgSyncConfig;
use crate::error::{LdapError, LdapResult};

/// Directory client over one `ldap3` connection.
pub struct Ldap3Directory {
    ldap: Ldap,
    bind_lock: Mutex<()>,
    operation_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Ldap3Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Directory")
            .field("operation_timeout", &self.operation_timeout)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Ldap3Directory {
    /// Opens a connection to the configured server. Does not bind.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Connection` if the server cannot be reached or the
    /// TLS handshake fails.
    pub async fn connect(config: &OrgSyncConfig) -> LdapResult<Self> {
        let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout);
        if config.tls.starttls {
            settings = settings.set_starttls(true);
        }
        if !config.tls.validate_certificates {
            settings = settings.set_no_tls_verify(true);
        }

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.url)
            .await
            .map_err(|e| LdapError::connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!("LDAP connection driver error: {}", e);
            }
        });

        tracing::debug!(url = %config.url, starttls = config.tls.starttls, "LDAP connection established");

        Ok(Self {
            ldap,
            bind_lock: Mutex::new(()),
            operation_timeout: config.operation_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns a handle for one operation, with the operation timeout applied.
    fn handle(&self) -> LdapResult<Ldap> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LdapError::Closed);
        }
        let mut ldap = self.ldap.clone();
        if let Some(timeout) = self.operation_timeout {
            ldap.with_timeout(timeout);
        }
        Ok(ldap)
    }
}

#[async_trait]
impl DirectoryClient for Ldap3Directory {
    async fn bind(&self, dn: &str, password: &str) -> OrgSyncResult<()> {
        let _guard = self.bind_lock.lock().await;
        let mut ldap = self.handle()?;
        ldap.simple_bind(dn, password)
            .await
            .map_err(|e| LdapError::Bind(e.to_string()))?
            .success()
            .map_err(|e| LdapError::Bind(e.to_string()))?;
        Ok(())
    }

    async fn search(&self, request: SearchRequest) -> OrgSyncResult<Box<dyn SearchEvents>> {
        let mut events = Ldap3SearchEvents {
            ldap: self.handle()?,
            request,
            stream: None,
            next_cookie: None,
            finished: false,
        };
        events.start_page(Vec::new()).await?;
        Ok(Box::new(events))
    }

    async fn abandon(&self, message_id: MessageId) -> OrgSyncResult<()> {
        self.handle()?.abandon(message_id).await.map_err(LdapError::from)?;
        Ok(())
    }

    async fn unbind(&self) -> OrgSyncResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ldap.clone().unbind().await.map_err(LdapError::from)?;
        Ok(())
    }
}

// ============================================================================
// Search Stream
// ============================================================================

struct Ldap3SearchEvents {
    ldap: Ldap,
    request: SearchRequest,
    stream: Option<SearchStream<'static, String, Vec<String>>>,
    next_cookie: Option<Vec<u8>>,
    finished: bool,
}

impl Ldap3SearchEvents {
    async fn start_page(&mut self, cookie: Vec<u8>) -> LdapResult<()> {
        let mut ldap = self.ldap.clone();

        let mut controls: Vec<RawControl> = self
            .request
            .controls
            .iter()
            .map(|control| RawControl {
                ctype: control.oid.clone(),
                crit: control.critical,
                val: control.value.clone(),
            })
            .collect();
        if let Some(size) = self.request.page_size {
            controls.push(
                PagedResults {
                    size: i32::try_from(size).unwrap_or(i32::MAX),
                    cookie,
                }
                .into(),
            );
        }
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }

        let stream = ldap
            .streaming_search(
                &self.request.base_dn,
                to_ldap3_scope(self.request.scope),
                &self.request.filter,
                self.request.attributes.clone(),
            )
            .await?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Finishes the current page and decides whether another one follows.
    async fn finish_page(&mut self, message_id: MessageId) -> SearchEvent {
        let result = match self.stream.take() {
            Some(mut stream) => stream.finish().await,
            None => return SearchEvent::Done(SearchOutcome::success()),
        };

        if result.rc != RESULT_SUCCESS {
            self.finished = true;
            return SearchEvent::Done(SearchOutcome::failure(result.rc, result.text));
        }

        if self.request.page_size.is_some() {
            let cookie = result
                .ctrls
                .iter()
                .find_map(|ldap3::controls::Control(ctype, raw)| match ctype {
                    Some(ControlType::PagedResults) => Some(raw.parse::<PagedResults>().cookie),
                    _ => None,
                })
                .unwrap_or_default();
            if !cookie.is_empty() {
                self.next_cookie = Some(cookie);
                return SearchEvent::PageEnd { message_id };
            }
        }

        self.finished = true;
        SearchEvent::Done(SearchOutcome::success())
    }

    /// Tells the server to discard the paged result set behind `cookie`.
    async fn release_cookie(&mut self, cookie: Vec<u8>) -> LdapResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.with_controls(PagedResults { size: 0, cookie });
        let result = ldap
            .search(
                &self.request.base_dn,
                to_ldap3_scope(self.request.scope),
                &self.request.filter,
                self.request.attributes.clone(),
            )
            .await?;
        if result.1.rc != RESULT_SUCCESS {
            tracing::debug!(rc = result.1.rc, text = %result.1.text, "Server refused to release paged results");
        }
        Ok(())
    }
}

#[async_trait]
impl SearchEvents for Ldap3SearchEvents {
    async fn next_event(&mut self) -> OrgSyncResult<Option<SearchEvent>> {
        if self.finished {
            return Ok(None);
        }

        if let Some(cookie) = self.next_cookie.take() {
            if let Err(e) = self.start_page(cookie).await {
                self.finished = true;
                return Err(e.into());
            }
        }

        loop {
            let Some(stream) = self.stream.as_mut() else {
                self.finished = true;
                return Ok(None);
            };
            let message_id = stream.ldap_handle().last_id();

            let next = match stream.next().await {
                Ok(next) => next,
                Err(e) => {
                    self.finished = true;
                    self.stream = None;
                    return Err(LdapError::from(e).into());
                }
            };

            match next {
                Some(raw) if raw.is_ref() || raw.is_intermediate() => continue,
                Some(raw) => {
                    let controls = raw
                        .1
                        .iter()
                        .map(|control| Control {
                            oid: control.1.ctype.clone(),
                            critical: control.1.crit,
                            value: control.1.val.clone(),
                        })
                        .collect();
                    return Ok(Some(SearchEvent::Entry {
                        message_id,
                        entry: to_directory_entry(SearchEntry::construct(raw)),
                        controls,
                    }));
                }
                None => return Ok(Some(self.finish_page(message_id).await)),
            }
        }
    }

    async fn cancel(&mut self) -> OrgSyncResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Some(mut stream) = self.stream.take() {
            let message_id = stream.ldap_handle().last_id();
            tracing::debug!(message_id, base_dn = %self.request.base_dn, "Abandoning page in flight");
            self.ldap.clone().abandon(message_id).await.map_err(LdapError::from)?;
            return Ok(());
        }
        if let Some(cookie) = self.next_cookie.take() {
            tracing::debug!(base_dn = %self.request.base_dn, "Releasing paged result set");
            self.release_cookie(cookie).await?;
        }
        Ok(())
    }
}

fn to_ldap3_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::One => Scope::OneLevel,
        SearchScope::Sub => Scope::Subtree,
    }
}

fn to_directory_entry(entry: SearchEntry) -> DirectoryEntry {
    let mut out = DirectoryEntry::new(entry.dn);
    for (name, values) in entry.attrs {
        for value in values {
            out.push_attr(name.clone(), value);
        }
    }
    if !entry.bin_attrs.is_empty() {
        tracing::trace!(
            dn = %out.dn,
            attributes = ?entry.bin_attrs.keys().collect::<Vec<_>>(),
            "Skipping binary attributes"
        );
    }
    out
}
