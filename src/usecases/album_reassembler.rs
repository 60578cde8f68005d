//! Album Reassembler: given downloaded artifacts plus their metadata,
//! reconstructs album groupings and applies the caption-placement rule.

use crate::domain::{LocalArtifact, MessageDescriptor, Reassembled};
use std::collections::HashMap;

/// Group artifacts by album key. Within an album, the first member by
/// ascending message-id keeps the first non-empty caption it carried; all
/// other members' captions are cleared. Singles keep their own caption.
pub fn assemble(artifacts: Vec<(LocalArtifact, MessageDescriptor)>) -> Reassembled {
    let mut by_album: HashMap<i64, Vec<(LocalArtifact, MessageDescriptor)>> = HashMap::new();
    let mut singles = Vec::new();

    for (artifact, descriptor) in artifacts {
        match descriptor.album_key {
            Some(key) => by_album.entry(key).or_default().push((artifact, descriptor)),
            None => singles.push((artifact, descriptor)),
        }
    }

    let mut albums = Vec::with_capacity(by_album.len());
    for (_, mut members) in by_album {
        members.sort_by_key(|(_, d)| d.message_id);

        let chosen_caption = members
            .iter()
            .find(|(_, d)| !d.caption.is_empty())
            .map(|(_, d)| (d.caption.clone(), d.caption_entities.clone()));

        for (i, (_, descriptor)) in members.iter_mut().enumerate() {
            match (&chosen_caption, i) {
                (Some((caption, entities)), 0) => {
                    descriptor.caption = caption.clone();
                    descriptor.caption_entities = entities.clone();
                }
                _ => {
                    descriptor.caption.clear();
                    descriptor.caption_entities.clear();
                }
            }
        }

        albums.push(members);
    }

    Reassembled { albums, singles }
}
