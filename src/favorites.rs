use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::GeotagError;
use crate::geo::Coordinate;

const FAVORITES_FILE: &str = "favorites.json";

/// Zoom level the map uses when jumping to a favorite.
pub const DEFAULT_FAVORITE_ZOOM: u8 = 16;

/// A named map point bound to a one-character hotkey.
///
/// Favorites are identified by `(key, name)`: several may share a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteLocation {
    /// One upper-case letter or digit.
    pub key: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl FavoriteLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    fn is(&self, key: &str, name: &str) -> bool {
        self.key == key && self.name == name
    }
}

/// Where the map should go when a favorite's hotkey is pressed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JumpTarget {
    pub coordinate: Coordinate,
    pub zoom: u8,
}

/// Persistence for the favorites list.
pub trait FavoritesRepository {
    fn load(&self) -> Result<Vec<FavoriteLocation>>;
    fn save(&mut self, favorites: &[FavoriteLocation]) -> Result<()>;
}

/// Favorites stored as pretty-printed JSON in a per-user config directory.
#[derive(Debug, Clone)]
pub struct JsonFavoritesStore {
    path: PathBuf,
}

impl JsonFavoritesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/<organization>/<application>/favorites.json`.
    pub fn for_namespace(organization: &str, application: &str) -> Result<Self> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(Self::new(dir.join(organization).join(application).join(FAVORITES_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FavoritesRepository for JsonFavoritesStore {
    fn load(&self) -> Result<Vec<FavoriteLocation>> {
        if !self.path.exists() {
            log::debug!("No favorites at {}", self.path.display());
            return Ok(Vec::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read favorites file")?;
        serde_json::from_str(&contents).context("Failed to parse favorites file")
    }

    fn save(&mut self, favorites: &[FavoriteLocation]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create favorites directory")?;
        }
        let contents =
            serde_json::to_string_pretty(favorites).context("Failed to serialize favorites")?;
        std::fs::write(&self.path, contents).context("Failed to write favorites file")?;
        log::debug!("Saved {} favorite(s) to {}", favorites.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store. Clones share the same list, so a test can keep a handle
/// to what was saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryFavoritesStore {
    saved: Rc<RefCell<Vec<FavoriteLocation>>>,
    saves: Rc<RefCell<usize>>,
}

impl MemoryFavoritesStore {
    pub fn with(favorites: Vec<FavoriteLocation>) -> Self {
        Self {
            saved: Rc::new(RefCell::new(favorites)),
            saves: Rc::default(),
        }
    }

    pub fn saved(&self) -> Vec<FavoriteLocation> {
        self.saved.borrow().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.borrow()
    }
}

impl FavoritesRepository for MemoryFavoritesStore {
    fn load(&self) -> Result<Vec<FavoriteLocation>> {
        Ok(self.saved())
    }

    fn save(&mut self, favorites: &[FavoriteLocation]) -> Result<()> {
        *self.saved.borrow_mut() = favorites.to_vec();
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

/// Upper-case a hotkey, rejecting anything but a single ASCII letter or digit.
pub fn normalize_key(key: &str) -> Result<String, GeotagError> {
    let mut chars = key.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => Ok(c.to_ascii_uppercase().to_string()),
        _ => Err(GeotagError::InvalidFavoriteKey(key.to_string())),
    }
}

/// The favorites list, saved through its repository after every change.
pub struct Favorites {
    repository: Box<dyn FavoritesRepository>,
    items: Vec<FavoriteLocation>,
}

impl std::fmt::Debug for Favorites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Favorites").field("items", &self.items).finish()
    }
}

impl Favorites {
    pub fn open(repository: Box<dyn FavoritesRepository>) -> Result<Self> {
        let items = repository.load()?;
        log::debug!("Loaded {} favorite(s)", items.len());
        Ok(Self { repository, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All favorites ordered by `(key, name)`.
    pub fn sorted(&self) -> Vec<&FavoriteLocation> {
        let mut sorted: Vec<_> = self.items.iter().collect();
        sorted.sort_by(|a, b| (&a.key, &a.name).cmp(&(&b.key, &b.name)));
        sorted
    }

    pub fn add(&mut self, key: &str, name: &str, coordinate: Coordinate) -> Result<()> {
        let key = normalize_key(key)?;
        let name = checked_name(name)?;
        let mut next = self.items.clone();
        next.push(FavoriteLocation {
            key,
            name,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
        });
        self.persist(next)
    }

    /// Rename/rebind the favorite `(key, name)` and move it to `coordinate`.
    pub fn edit(
        &mut self,
        key: &str,
        name: &str,
        new_key: &str,
        new_name: &str,
        coordinate: Coordinate,
    ) -> Result<()> {
        let key = normalize_key(key)?;
        let new_key = normalize_key(new_key)?;
        let new_name = checked_name(new_name)?;

        let mut next = self.items.clone();
        let fav = next
            .iter_mut()
            .find(|f| f.is(&key, name))
            .ok_or_else(|| not_found(&key, name))?;
        fav.key = new_key;
        fav.name = new_name;
        fav.latitude = coordinate.latitude;
        fav.longitude = coordinate.longitude;
        self.persist(next)
    }

    /// Remove every favorite identified by `(key, name)`.
    pub fn remove(&mut self, key: &str, name: &str) -> Result<()> {
        let key = normalize_key(key)?;
        let next: Vec<_> = self
            .items
            .iter()
            .filter(|f| !f.is(&key, name))
            .cloned()
            .collect();
        if next.len() == self.items.len() {
            return Err(not_found(&key, name).into());
        }
        self.persist(next)
    }

    /// Every favorite bound to `key` (case-insensitive), in stored order.
    pub fn matching(&self, key: char) -> Vec<&FavoriteLocation> {
        let key = key.to_ascii_uppercase().to_string();
        self.items.iter().filter(|f| f.key == key).collect()
    }

    /// Where a hotkey press leaves the map.
    ///
    /// A key shared by several favorites jumps through each of them in stored
    /// order, so the map ends up on the one added last.
    pub fn jump_target(&self, key: char, zoom: u8) -> Option<JumpTarget> {
        self.matching(key).last().map(|f| JumpTarget {
            coordinate: f.coordinate(),
            zoom,
        })
    }

    fn persist(&mut self, next: Vec<FavoriteLocation>) -> Result<()> {
        self.repository.save(&next)?;
        self.items = next;
        Ok(())
    }
}

fn checked_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("favorite name must not be empty");
    }
    Ok(name.to_string())
}

fn not_found(key: &str, name: &str) -> GeotagError {
    GeotagError::FavoriteNotFound {
        key: key.to_string(),
        name: name.to_string(),
    }
}
