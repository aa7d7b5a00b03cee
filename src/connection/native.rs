//! The ldap3-backed directory connection.
//!
//! Wire controls the ldap3 crate has no typed wrapper for travel as
//! [`ldap3::controls::RawControl`] with hand-encoded values; the encodings
//! here (proxied authorization, paged results, equality assertion) are the
//! only ones the gateway emits. Read-entry request controls are emulated
//! with a base-object search around the write, since parsing the response
//! control's embedded entry is not worth a BER decoder of our own.

use crate::config::DirectoryConfig;
use crate::connection::{
    AddRequest, Control, DeleteRequest, DirectoryConnection, DirectoryError, DirectoryResult,
    ModifyRequest, PasswordModifyRequest, SearchRequest, SearchResult, SearchScope, WriteResult,
    result_code,
};
use crate::ldap::{Attribute, Dn, Entry, LdapFilter, Modification, ModificationKind};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ldap3::controls::RawControl;
use ldap3::exop::{PasswordModify, PasswordModifyResp};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use log::warn;
use std::collections::HashSet;
use std::time::Duration;

const OID_PERMISSIVE_MODIFY: &str = "1.2.840.113556.1.4.1413";
const OID_SUBTREE_DELETE: &str = "1.2.840.113556.1.4.805";
const OID_PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
const OID_PROXIED_AUTH: &str = "2.16.840.1.113730.3.4.18";
const OID_ASSERTION: &str = "1.3.6.1.1.12";

pub struct NativeDirectory {
    ldap: Ldap,
}

impl NativeDirectory {
    /// Connect and bind. The connection driver runs on a spawned task for
    /// the life of the connection.
    pub async fn connect(config: &DirectoryConfig) -> DirectoryResult<Self> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .set_starttls(config.starttls);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &config.url)
            .await
            .map_err(connect_error)?;
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!("directory connection driver failed: {err}");
            }
        });
        ldap.simple_bind(&config.bind_dn, &config.bind_password)
            .await
            .map_err(connect_error)?
            .success()
            .map_err(|err| DirectoryError::Authentication(err.to_string()))?;
        Ok(Self { ldap })
    }

    // Ldap handles are cheap clones over one shared connection; each
    // operation works on its own clone so per-operation controls do not
    // leak across concurrent requests.
    fn handle(&self) -> Ldap {
        self.ldap.clone()
    }

    /// Run the read-entry emulation for a write: a base-object search scoped
    /// to the control's attribute list.
    async fn read_for_control(&self, dn: &Dn, attributes: &[String]) -> Option<Entry> {
        let request = SearchRequest::base_object(dn.clone(), attributes.to_vec());
        match self.search(request).await {
            Ok(result) => result.entries.into_iter().next(),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl DirectoryConnection for NativeDirectory {
    async fn search(&self, request: SearchRequest) -> DirectoryResult<SearchResult> {
        let mut ldap = self.handle();
        let controls = encode_controls(&request.controls)?
            .into_iter()
            .chain(request.page.as_ref().map(|p| paged_results(p.size, &p.cookie)))
            .collect::<Vec<_>>();
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }
        let attributes: Vec<&str> = request.attributes.iter().map(String::as_str).collect();
        let (entries, result) = ldap
            .search(
                &request.base.to_string(),
                scope(request.scope),
                &request.filter.to_string(),
                attributes,
            )
            .await
            .map_err(transport_error)?
            .success()
            .map_err(result_error)?;
        let paged_cookie = result
            .ctrls
            .iter()
            .find(|c| c.1.ctype == OID_PAGED_RESULTS)
            .and_then(|c| c.1.val.as_deref())
            .and_then(parse_paged_cookie)
            .filter(|cookie| !cookie.is_empty());
        let mut decoded = Vec::with_capacity(entries.len());
        for entry in entries {
            decoded.push(convert_entry(SearchEntry::construct(entry))?);
        }
        if request.size_limit > 0 {
            decoded.truncate(request.size_limit as usize);
        }
        Ok(SearchResult {
            entries: decoded,
            paged_cookie,
        })
    }

    async fn add(&self, request: AddRequest) -> DirectoryResult<WriteResult> {
        let mut ldap = self.handle();
        let controls = encode_controls(&request.controls)?;
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }
        let attrs: Vec<(String, HashSet<String>)> = request
            .entry
            .attributes()
            .iter()
            .map(|a| (a.name.clone(), a.values.iter().cloned().collect()))
            .collect();
        ldap.add(&request.entry.dn.to_string(), attrs)
            .await
            .map_err(transport_error)?
            .success()
            .map_err(result_error)?;
        let mut result = WriteResult::default();
        if let Some(attributes) = wants_post_read(&request.controls) {
            result.post_read = self.read_for_control(&request.entry.dn, attributes).await;
        }
        Ok(result)
    }

    async fn modify(&self, request: ModifyRequest) -> DirectoryResult<WriteResult> {
        let mut result = WriteResult::default();
        if let Some(attributes) = wants_pre_read(&request.controls) {
            result.pre_read = self.read_for_control(&request.dn, attributes).await;
        }
        let mut ldap = self.handle();
        let controls = encode_controls(&request.controls)?;
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }
        let mods: Vec<Mod<String>> = request.modifications.iter().map(convert_mod).collect();
        ldap.modify(&request.dn.to_string(), mods)
            .await
            .map_err(transport_error)?
            .success()
            .map_err(result_error)?;
        if let Some(attributes) = wants_post_read(&request.controls) {
            result.post_read = self.read_for_control(&request.dn, attributes).await;
        }
        Ok(result)
    }

    async fn delete(&self, request: DeleteRequest) -> DirectoryResult<()> {
        let mut ldap = self.handle();
        let controls = encode_controls(&request.controls)?;
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }
        ldap.delete(&request.dn.to_string())
            .await
            .map_err(transport_error)?
            .success()
            .map_err(result_error)?;
        Ok(())
    }

    async fn modify_password(
        &self,
        request: PasswordModifyRequest,
    ) -> DirectoryResult<Option<String>> {
        let mut ldap = self.handle();
        let controls = encode_controls(&request.controls)?;
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }
        let dn = request.dn.to_string();
        let exop = PasswordModify {
            user_id: Some(&dn),
            old_pass: request.old_password.as_deref(),
            new_pass: request.new_password.as_deref(),
        };
        let (exop, _) = ldap
            .extended(exop)
            .await
            .map_err(transport_error)?
            .success()
            .map_err(result_error)?;
        if exop.val.is_none() {
            return Ok(None);
        }
        let response: PasswordModifyResp = exop.parse();
        Ok(Some(response.gen_pass))
    }
}

fn scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::One => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn convert_mod(modification: &Modification) -> Mod<String> {
    let name = modification.attribute.name.clone();
    let values: HashSet<String> = modification.attribute.values.iter().cloned().collect();
    match modification.kind {
        ModificationKind::Add => Mod::Add(name, values),
        ModificationKind::Delete => Mod::Delete(name, values),
        ModificationKind::Replace => Mod::Replace(name, values),
        ModificationKind::Increment => Mod::Increment(
            name,
            modification
                .attribute
                .values
                .first()
                .cloned()
                .unwrap_or_default(),
        ),
    }
}

fn convert_entry(entry: SearchEntry) -> DirectoryResult<Entry> {
    let dn = Dn::parse(&entry.dn).map_err(|reason| {
        DirectoryError::result(
            result_code::NAMING_VIOLATION,
            format!("unparseable DN '{}': {reason}", entry.dn),
        )
    })?;
    let mut out = Entry::new(dn);
    for (name, values) in entry.attrs {
        out.put(Attribute::new(name, values));
    }
    // Binary syntaxes travel base64, matching their JSON representation.
    for (name, values) in entry.bin_attrs {
        out.put(Attribute::new(
            name,
            values.iter().map(|v| BASE64.encode(v)).collect(),
        ));
    }
    Ok(out)
}

fn wants_pre_read(controls: &[Control]) -> Option<&[String]> {
    controls.iter().find_map(|c| match c {
        Control::PreRead { attributes } => Some(attributes.as_slice()),
        _ => None,
    })
}

fn wants_post_read(controls: &[Control]) -> Option<&[String]> {
    controls.iter().find_map(|c| match c {
        Control::PostRead { attributes } => Some(attributes.as_slice()),
        _ => None,
    })
}

/// Encode the gateway's typed controls as raw wire controls. Read-entry
/// controls are handled out of band and encode to nothing here.
fn encode_controls(controls: &[Control]) -> DirectoryResult<Vec<RawControl>> {
    let mut out = Vec::new();
    for control in controls {
        match control {
            Control::PermissiveModify => out.push(RawControl {
                ctype: OID_PERMISSIVE_MODIFY.to_string(),
                crit: false,
                val: None,
            }),
            Control::SubtreeDelete { critical } => out.push(RawControl {
                ctype: OID_SUBTREE_DELETE.to_string(),
                crit: *critical,
                val: None,
            }),
            Control::ProxiedAuthorization { authorization_id } => out.push(RawControl {
                ctype: OID_PROXIED_AUTH.to_string(),
                crit: true,
                val: Some(authorization_id.as_bytes().to_vec()),
            }),
            Control::Assertion { filter } => out.push(RawControl {
                ctype: OID_ASSERTION.to_string(),
                crit: true,
                val: Some(encode_assertion(filter)?),
            }),
            Control::PreRead { .. } | Control::PostRead { .. } => {}
        }
    }
    Ok(out)
}

fn paged_results(size: u32, cookie: &[u8]) -> RawControl {
    let mut content = der_integer(i64::from(size));
    content.extend(der_tlv(0x04, cookie));
    RawControl {
        ctype: OID_PAGED_RESULTS.to_string(),
        crit: false,
        val: Some(der_tlv(0x30, &content)),
    }
}

/// The assertion control value is an LDAP Filter. Only the shapes the
/// orchestrator emits are encodable.
fn encode_assertion(filter: &LdapFilter) -> DirectoryResult<Vec<u8>> {
    match filter {
        LdapFilter::Equality(attribute, value) => {
            // equalityMatch [3] AttributeValueAssertion
            let mut content = der_tlv(0x04, attribute.as_bytes());
            content.extend(der_tlv(0x04, value.as_bytes()));
            Ok(der_tlv(0xa3, &content))
        }
        LdapFilter::Present(attribute) => {
            // present [7] AttributeDescription
            Ok(der_tlv(0x87, attribute.as_bytes()))
        }
        other => Err(DirectoryError::result(
            result_code::UNWILLING_TO_PERFORM,
            format!("assertion filter '{other}' has no wire encoding"),
        )),
    }
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        out.push(0x80 | (bytes.len() - first) as u8);
        out.extend(&bytes[first..]);
    }
    out.extend(content);
    out
}

fn der_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut first = 0;
    while first < bytes.len() - 1
        && ((bytes[first] == 0 && bytes[first + 1] < 0x80)
            || (bytes[first] == 0xff && bytes[first + 1] >= 0x80))
    {
        first += 1;
    }
    der_tlv(0x02, &bytes[first..])
}

/// Pull the cookie out of a paged-results response control value.
fn parse_paged_cookie(value: &[u8]) -> Option<Vec<u8>> {
    let (tag, content, _) = der_read(value)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, _, rest) = der_read(content)?;
    if tag != 0x02 {
        return None;
    }
    let (tag, cookie, _) = der_read(rest)?;
    (tag == 0x04).then(|| cookie.to_vec())
}

fn der_read(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first_len, mut rest) = rest.split_first()?;
    let len = if first_len < 0x80 {
        first_len as usize
    } else {
        let count = (first_len & 0x7f) as usize;
        if count == 0 || count > rest.len() || count > 8 {
            return None;
        }
        let mut len = 0usize;
        for &b in &rest[..count] {
            len = (len << 8) | b as usize;
        }
        rest = &rest[count..];
        len
    };
    if len > rest.len() {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

fn connect_error(err: ldap3::LdapError) -> DirectoryError {
    DirectoryError::Connection(err.to_string())
}

fn transport_error(err: ldap3::LdapError) -> DirectoryError {
    let text = err.to_string();
    if text.contains("timed out") || text.contains("timeout") {
        DirectoryError::Timeout(text)
    } else {
        DirectoryError::Connection(text)
    }
}

fn result_error(err: ldap3::LdapError) -> DirectoryError {
    match err {
        ldap3::LdapError::LdapResult { result } => DirectoryError::Result {
            code: result.rc,
            matched_dn: result.matched,
            message: result.text,
        },
        other => transport_error(other),
    }
}
