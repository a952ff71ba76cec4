//! Copy-on-write union of an upper (mutable) directory over a lower
//! (immutable) one, with per-directory whiteout sets.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use crate::errors::{FsError, Result};
use crate::file::{
    Dir, Emplaced, File, FileId, Mode, Node, OpenMode, Regular, SpaceInfo, Symlink,
};

/// Whiteout state of one union directory, with the states of its
/// children. Every view of the same name shares the same context.
pub(crate) struct UnionCtx {
    children: RefCell<HashMap<String, Rc<UnionCtx>>>,
    hidden: RefCell<HashSet<String>>,
}

impl UnionCtx {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            children: RefCell::new(HashMap::new()),
            hidden: RefCell::new(HashSet::new()),
        })
    }

    fn at(self: &Rc<Self>, name: &str) -> Rc<UnionCtx> {
        if let Some(ctx) = self.children.borrow().get(name) {
            return ctx.clone();
        }

        let ctx = UnionCtx::new();
        self.children
            .borrow_mut()
            .insert(name.to_owned(), ctx.clone());
        ctx
    }

    fn is_hidden(&self, name: &str) -> bool {
        self.hidden.borrow().contains(name)
    }

    fn hide(&self, name: &str) -> bool {
        self.hidden.borrow_mut().insert(name.to_owned())
    }
}

/// A lazy record of the directories that must exist on upper before a
/// write can land there. `pull` materializes them.
#[derive(Clone)]
pub(crate) struct Anchor {
    upper: Rc<dyn Dir>,
    crumbs: Vec<String>,
}

impl Anchor {
    fn new(upper: Rc<dyn Dir>) -> Self {
        Self { upper, crumbs: Vec::new() }
    }

    fn with_crumb(upper: Rc<dyn Dir>, name: &str) -> Self {
        Self { upper, crumbs: vec![name.to_owned()] }
    }

    fn next(&self, name: &str) -> Anchor {
        let mut crumbs = self.crumbs.clone();
        crumbs.push(name.to_owned());
        Self { upper: self.upper.clone(), crumbs }
    }

    fn target(&self) -> Rc<dyn Dir> {
        self.upper.clone()
    }

    fn pull(&mut self) -> Result<Rc<dyn Dir>> {
        let mut d = self.upper.clone();
        for name in &self.crumbs {
            let Some((next, _)) = d.emplace_dir(name)?.get() else {
                return Err(FsError::AlreadyExists(PathBuf::from(name)));
            };
            d = next;
        }

        self.upper = d.clone();
        self.crumbs.clear();
        Ok(d)
    }
}

/// Files visible through `file` and not whited out by `ctx`, counting
/// each directory entry once.
fn count_files(ctx: &Rc<UnionCtx>, file: &File) -> u64 {
    let File::Dir(d) = file else {
        return 1;
    };

    let mut cnt = 1;
    for (name, f) in d.entries().unwrap_or_default() {
        if ctx.is_hidden(&name) {
            continue;
        }
        cnt += count_files(&ctx.at(&name), &f);
    }
    cnt
}

fn sup_branch(ctx: Rc<UnionCtx>, upper: Rc<dyn Dir>) -> Rc<dyn Dir> {
    Rc::new(SupBranch { ctx, upper })
}

fn sub_shell(ctx: Rc<UnionCtx>, lower: Rc<dyn Dir>, anchor: Anchor) -> Rc<dyn Dir> {
    Rc::new(SubShell {
        state: RefCell::new(ShellState::Sub(Rc::new(SubBranch {
            ctx,
            lower,
            anchor: RefCell::new(anchor),
        }))),
    })
}

/// A regular file that still lives on lower. Reads go straight through;
/// the first write pulls the anchor and re-homes the file on upper,
/// pre-copying the bytes when the write means to extend them.
struct LowerRegular {
    name: String,
    target: RefCell<Rc<dyn Regular>>,
    anchor: RefCell<Option<Anchor>>,
}

impl LowerRegular {
    fn new(name: &str, target: Rc<dyn Regular>, anchor: Anchor) -> Self {
        Self {
            name: name.to_owned(),
            target: RefCell::new(target),
            anchor: RefCell::new(Some(anchor)),
        }
    }

    fn pull(&self, preserve: bool) -> Result<Rc<dyn Regular>> {
        let anchor = self.anchor.borrow().clone();
        let Some(mut anchor) = anchor else {
            return Ok(self.target.borrow().clone());
        };

        let upper = anchor.pull()?;
        let Some((new, _)) = upper.emplace_regular(&self.name)?.get() else {
            return Err(FsError::AlreadyExists(PathBuf::from(&self.name)));
        };
        if preserve {
            let old = self.target.borrow().clone();
            new.copy_content_from(&*old)?;
        }

        *self.target.borrow_mut() = new.clone();
        *self.anchor.borrow_mut() = None;
        Ok(new)
    }
}

impl Node for LowerRegular {
    fn owner(&self) -> i64 {
        self.target.borrow().owner()
    }

    fn group(&self) -> i64 {
        self.target.borrow().group()
    }

    fn set_ownership(&self, owner: i64, group: i64) {
        self.target.borrow().set_ownership(owner, group);
    }

    fn mode(&self) -> Mode {
        self.target.borrow().mode()
    }

    fn set_mode(&self, mode: Mode) -> Result<()> {
        self.target.borrow().set_mode(mode)
    }

    fn id(&self) -> FileId {
        self.target.borrow().id()
    }

    fn nlink(&self) -> u64 {
        self.target.borrow().nlink()
    }

    fn link_added(&self) {
        self.target.borrow().link_added();
    }

    fn link_removed(&self) {
        self.target.borrow().link_removed();
    }

    fn space(&self) -> Result<SpaceInfo> {
        self.target.borrow().space()
    }
}

impl Regular for LowerRegular {
    fn size(&self) -> Result<u64> {
        self.target.borrow().size()
    }

    fn resize(&self, new_size: u64) -> Result<()> {
        self.pull(true)?.resize(new_size)
    }

    fn last_write_time(&self) -> Result<SystemTime> {
        self.target.borrow().last_write_time()
    }

    fn set_last_write_time(&self, t: SystemTime) -> Result<()> {
        self.pull(true)?.set_last_write_time(t)
    }

    fn open_read(&self, mode: OpenMode) -> Result<Box<dyn Read>> {
        self.target.borrow().open_read(mode)
    }

    fn open_write(&self, mode: OpenMode) -> Result<Box<dyn Write>> {
        let preserve = mode.contains(OpenMode::APPEND);
        self.pull(preserve)?.open_write(mode)
    }

    fn copy_content_from(&self, src: &dyn Regular) -> Result<()> {
        self.pull(false)?.copy_content_from(src)
    }

    fn shared_bytes(&self) -> Option<Rc<Vec<u8>>> {
        self.target.borrow().shared_bytes()
    }
}

macro_rules! node_via {
    ($field:ident) => {
        fn owner(&self) -> i64 {
            self.$field.owner()
        }

        fn group(&self) -> i64 {
            self.$field.group()
        }

        fn set_ownership(&self, owner: i64, group: i64) {
            self.$field.set_ownership(owner, group);
        }

        fn mode(&self) -> Mode {
            self.$field.mode()
        }

        fn set_mode(&self, mode: Mode) -> Result<()> {
            self.$field.set_mode(mode)
        }

        fn id(&self) -> FileId {
            self.$field.id()
        }

        fn nlink(&self) -> u64 {
            self.$field.nlink()
        }

        fn link_added(&self) {
            self.$field.link_added();
        }

        fn link_removed(&self) {
            self.$field.link_removed();
        }

        fn space(&self) -> Result<SpaceInfo> {
            self.$field.space()
        }
    };
}

/// The union view of an upper and a lower directory of the same name.
pub(crate) struct UnionDir {
    ctx: Rc<UnionCtx>,
    upper: Rc<dyn Dir>,
    lower: Rc<dyn Dir>,
}

impl UnionDir {
    pub fn new(upper: Rc<dyn Dir>, lower: Rc<dyn Dir>) -> Self {
        Self::with_ctx(UnionCtx::new(), upper, lower)
    }

    fn with_ctx(ctx: Rc<UnionCtx>, upper: Rc<dyn Dir>, lower: Rc<dyn Dir>) -> Self {
        Self { ctx, upper, lower }
    }

    fn lower_next(&self, name: &str) -> Result<Option<File>> {
        if self.ctx.is_hidden(name) {
            return Ok(None);
        }
        self.lower.next(name)
    }
}

impl Node for UnionDir {
    node_via!(upper);
}

impl Dir for UnionDir {
    fn len(&self) -> Result<u64> {
        Ok(self.entries()?.len() as u64)
    }

    fn is_empty(&self) -> Result<bool> {
        if !self.upper.is_empty()? {
            return Ok(false);
        }

        for (name, _) in self.lower.entries()? {
            if !self.ctx.is_hidden(&name) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn contains(&self, name: &str) -> Result<bool> {
        if self.upper.contains(name)? {
            return Ok(true);
        }
        if self.ctx.is_hidden(name) {
            return Ok(false);
        }
        self.lower.contains(name)
    }

    fn next(&self, name: &str) -> Result<Option<File>> {
        let up = self.upper.next(name)?;
        let lo = self.lower_next(name)?;

        Ok(match up {
            Some(File::Dir(ud)) => Some(File::Dir(match lo.and_then(|f| f.as_dir()) {
                Some(ld) => Rc::new(UnionDir::with_ctx(self.ctx.at(name), ud, ld)),
                None => sup_branch(self.ctx.at(name), ud),
            })),
            Some(f) => Some(f),
            None => match lo {
                Some(File::Dir(ld)) => Some(File::Dir(sub_shell(
                    self.ctx.at(name),
                    ld,
                    Anchor::with_crumb(self.upper.clone(), name),
                ))),
                Some(File::Regular(lr)) => Some(File::Regular(Rc::new(LowerRegular::new(
                    name,
                    lr,
                    Anchor::new(self.upper.clone()),
                )))),
                other => other,
            },
        })
    }

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>> {
        if let Some(up) = self.upper.next(name)? {
            return Ok(match up.as_regular() {
                Some(r) => Emplaced::Existing(r),
                None => Emplaced::Conflict,
            });
        }

        match self.lower_next(name)? {
            None => self.upper.emplace_regular(name),
            Some(File::Regular(lr)) => Ok(Emplaced::Existing(Rc::new(LowerRegular::new(
                name,
                lr,
                Anchor::new(self.upper.clone()),
            )))),
            Some(_) => Ok(Emplaced::Conflict),
        }
    }

    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>> {
        let Some(lo) = self.lower_next(name)? else {
            return Ok(match self.upper.emplace_dir(name)? {
                Emplaced::Created(d) => Emplaced::Created(sup_branch(self.ctx.at(name), d)),
                Emplaced::Existing(d) => Emplaced::Existing(sup_branch(self.ctx.at(name), d)),
                Emplaced::Conflict => Emplaced::Conflict,
            });
        };

        let Some(up) = self.upper.next(name)? else {
            return Ok(match lo.as_dir() {
                Some(ld) => Emplaced::Existing(sub_shell(
                    self.ctx.at(name),
                    ld,
                    Anchor::with_crumb(self.upper.clone(), name),
                )),
                None => Emplaced::Conflict,
            });
        };

        Ok(match (up.as_dir(), lo.as_dir()) {
            (None, _) => Emplaced::Conflict,
            (Some(ud), None) => Emplaced::Existing(sup_branch(self.ctx.at(name), ud)),
            (Some(ud), Some(ld)) => {
                Emplaced::Existing(Rc::new(UnionDir::with_ctx(self.ctx.at(name), ud, ld)))
            }
        })
    }

    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>> {
        if let Some(up) = self.upper.next(name)? {
            return Ok(match up.as_symlink() {
                Some(l) => Emplaced::Existing(l),
                None => Emplaced::Conflict,
            });
        }

        match self.lower_next(name)? {
            None => self.upper.emplace_symlink(name, target),
            Some(File::Symlink(l)) => Ok(Emplaced::Existing(l)),
            Some(_) => Ok(Emplaced::Conflict),
        }
    }

    fn link(&self, name: &str, file: File) -> Result<bool> {
        self.upper.link(name, file)
    }

    fn relink(&self, name: &str, file: File) -> Result<()> {
        self.upper.relink(name, file)
    }

    fn unlink(&self, name: &str) -> Result<bool> {
        if self.upper.unlink(name)? {
            self.ctx.hide(name);
            return Ok(true);
        }

        if self.ctx.is_hidden(name) {
            return Ok(false);
        }
        if !self.lower.contains(name)? {
            return Ok(false);
        }

        Ok(self.ctx.hide(name))
    }

    fn erase(&self, name: &str) -> Result<u64> {
        let cnt = self.upper.erase(name)?;
        if cnt > 0 {
            self.ctx.hide(name);
            return Ok(cnt);
        }

        if self.ctx.is_hidden(name) {
            return Ok(0);
        }
        let Some(lo) = self.lower.next(name)? else {
            return Ok(0);
        };

        self.ctx.hide(name);
        Ok(count_files(&self.ctx.at(name), &lo))
    }

    fn clear(&self) -> Result<u64> {
        for (name, _) in self.upper.entries()? {
            self.ctx.hide(&name);
        }

        let mut cnt = 0;
        for (name, file) in self.lower.entries()? {
            if !self.ctx.hide(&name) {
                continue;
            }
            cnt += count_files(&self.ctx.at(&name), &file);
        }

        cnt += self.upper.clear()?;
        Ok(cnt)
    }

    fn entries(&self) -> Result<Vec<(String, File)>> {
        let mut names: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (name, _) in self.upper.entries()? {
            seen.insert(name.clone());
            names.push(name);
        }
        for (name, _) in self.lower.entries()? {
            if self.ctx.is_hidden(&name) || seen.contains(&name) {
                continue;
            }
            names.push(name);
        }

        let mut out = Vec::new();
        for name in names {
            if let Some(file) = self.next(&name)? {
                out.push((name, file));
            }
        }
        Ok(out)
    }

    fn mount_next(&self, _name: &str, _file: File) -> Result<()> {
        Ok(())
    }

    fn unmount_next(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// The upper-only side of a union: upper has a directory here while lower
/// has nothing (or a non-directory, which it shadows).
struct SupBranch {
    ctx: Rc<UnionCtx>,
    upper: Rc<dyn Dir>,
}

impl Node for SupBranch {
    node_via!(upper);
}

impl Dir for SupBranch {
    fn len(&self) -> Result<u64> {
        self.upper.len()
    }

    fn is_empty(&self) -> Result<bool> {
        self.upper.is_empty()
    }

    fn contains(&self, name: &str) -> Result<bool> {
        self.upper.contains(name)
    }

    fn next(&self, name: &str) -> Result<Option<File>> {
        Ok(self.upper.next(name)?.map(|f| match f {
            File::Dir(d) => File::Dir(sup_branch(self.ctx.at(name), d)),
            f => f,
        }))
    }

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>> {
        self.upper.emplace_regular(name)
    }

    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>> {
        Ok(match self.upper.emplace_dir(name)? {
            Emplaced::Created(d) => Emplaced::Created(sup_branch(self.ctx.at(name), d)),
            Emplaced::Existing(d) => Emplaced::Existing(sup_branch(self.ctx.at(name), d)),
            Emplaced::Conflict => Emplaced::Conflict,
        })
    }

    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>> {
        self.upper.emplace_symlink(name, target)
    }

    fn link(&self, name: &str, file: File) -> Result<bool> {
        self.upper.link(name, file)
    }

    fn relink(&self, name: &str, file: File) -> Result<()> {
        self.upper.relink(name, file)
    }

    fn unlink(&self, name: &str) -> Result<bool> {
        let ok = self.upper.unlink(name)?;
        if ok {
            self.ctx.hide(name);
        }
        Ok(ok)
    }

    fn erase(&self, name: &str) -> Result<u64> {
        let cnt = self.upper.erase(name)?;
        if cnt > 0 {
            self.ctx.hide(name);
        }
        Ok(cnt)
    }

    fn clear(&self) -> Result<u64> {
        for (name, _) in self.upper.entries()? {
            self.ctx.hide(&name);
        }
        self.upper.clear()
    }

    fn entries(&self) -> Result<Vec<(String, File)>> {
        Ok(self
            .upper
            .entries()?
            .into_iter()
            .map(|(name, f)| match f {
                File::Dir(d) => {
                    let wrapped = File::Dir(sup_branch(self.ctx.at(&name), d));
                    (name, wrapped)
                }
                f => (name, f),
            })
            .collect())
    }

    fn mount_next(&self, _name: &str, _file: File) -> Result<()> {
        Ok(())
    }

    fn unmount_next(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// The lower-only side of a union: a directory that exists on lower while
/// upper does not have it yet. Writes pull the anchor first.
struct SubBranch {
    ctx: Rc<UnionCtx>,
    lower: Rc<dyn Dir>,
    anchor: RefCell<Anchor>,
}

impl SubBranch {
    fn visible(&self, name: &str) -> Result<Option<File>> {
        if self.ctx.is_hidden(name) {
            return Ok(None);
        }
        self.lower.next(name)
    }

    fn pull(&self) -> Result<Rc<dyn Dir>> {
        self.anchor.borrow_mut().pull()
    }
}

impl Node for SubBranch {
    node_via!(lower);
}

impl Dir for SubBranch {
    fn len(&self) -> Result<u64> {
        Ok(self.entries()?.len() as u64)
    }

    fn is_empty(&self) -> Result<bool> {
        for (name, _) in self.lower.entries()? {
            if !self.ctx.is_hidden(&name) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn contains(&self, name: &str) -> Result<bool> {
        if self.ctx.is_hidden(name) {
            return Ok(false);
        }
        self.lower.contains(name)
    }

    fn next(&self, name: &str) -> Result<Option<File>> {
        Ok(self.visible(name)?.map(|f| match f {
            File::Dir(ld) => File::Dir(sub_shell(
                self.ctx.at(name),
                ld,
                self.anchor.borrow().next(name),
            )),
            File::Regular(lr) => {
                File::Regular(Rc::new(LowerRegular::new(name, lr, self.anchor.borrow().clone())))
            }
            f => f,
        }))
    }

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>> {
        match self.visible(name)? {
            Some(File::Regular(lr)) => Ok(Emplaced::Existing(Rc::new(LowerRegular::new(
                name,
                lr,
                self.anchor.borrow().clone(),
            )))),
            Some(_) => Ok(Emplaced::Conflict),
            None => self.pull()?.emplace_regular(name),
        }
    }

    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>> {
        match self.visible(name)? {
            Some(File::Dir(ld)) => Ok(Emplaced::Existing(sub_shell(
                self.ctx.at(name),
                ld,
                self.anchor.borrow().next(name),
            ))),
            Some(_) => Ok(Emplaced::Conflict),
            None => Ok(match self.pull()?.emplace_dir(name)? {
                Emplaced::Created(d) => Emplaced::Created(sup_branch(self.ctx.at(name), d)),
                Emplaced::Existing(d) => Emplaced::Existing(sup_branch(self.ctx.at(name), d)),
                Emplaced::Conflict => Emplaced::Conflict,
            }),
        }
    }

    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>> {
        match self.visible(name)? {
            Some(File::Symlink(l)) => Ok(Emplaced::Existing(l)),
            Some(_) => Ok(Emplaced::Conflict),
            None => self.pull()?.emplace_symlink(name, target),
        }
    }

    fn link(&self, name: &str, file: File) -> Result<bool> {
        if self.visible(name)?.is_some() {
            return Ok(false);
        }
        self.pull()?.link(name, file)
    }

    fn relink(&self, name: &str, file: File) -> Result<()> {
        self.pull()?.relink(name, file)
    }

    fn unlink(&self, name: &str) -> Result<bool> {
        if self.ctx.is_hidden(name) {
            return Ok(false);
        }
        if !self.lower.contains(name)? {
            return Ok(false);
        }

        Ok(self.ctx.hide(name))
    }

    fn erase(&self, name: &str) -> Result<u64> {
        if self.ctx.is_hidden(name) {
            return Ok(0);
        }
        let Some(file) = self.lower.next(name)? else {
            return Ok(0);
        };

        self.ctx.hide(name);
        Ok(count_files(&self.ctx.at(name), &file))
    }

    fn clear(&self) -> Result<u64> {
        let mut cnt = 0;
        for (name, file) in self.lower.entries()? {
            if !self.ctx.hide(&name) {
                continue;
            }
            cnt += count_files(&self.ctx.at(&name), &file);
        }
        Ok(cnt)
    }

    fn entries(&self) -> Result<Vec<(String, File)>> {
        let mut out = Vec::new();
        for (name, _) in self.lower.entries()? {
            if self.ctx.is_hidden(&name) {
                continue;
            }
            if let Some(file) = self.next(&name)? {
                out.push((name, file));
            }
        }
        Ok(out)
    }

    fn mount_next(&self, name: &str, file: File) -> Result<()> {
        self.pull()?.mount_next(name, file)
    }

    fn unmount_next(&self, name: &str) -> Result<()> {
        self.pull()?.unmount_next(name)
    }
}

/// Holds a lower-only branch and upgrades it to a full union view once a
/// write materializes its upper side, so later lookups see both sides.
struct SubShell {
    state: RefCell<ShellState>,
}

enum ShellState {
    Sub(Rc<SubBranch>),
    Union(Rc<UnionDir>),
}

impl SubShell {
    fn current(&self) -> Rc<dyn Dir> {
        match &*self.state.borrow() {
            ShellState::Sub(s) => s.clone(),
            ShellState::Union(u) => u.clone(),
        }
    }

    fn upgrade(&self) {
        let mut state = self.state.borrow_mut();
        if let ShellState::Sub(sub) = &*state {
            let upper = sub.anchor.borrow().target();
            let union = UnionDir::with_ctx(sub.ctx.clone(), upper, sub.lower.clone());
            *state = ShellState::Union(Rc::new(union));
        }
    }
}

impl Node for SubShell {
    fn owner(&self) -> i64 {
        self.current().owner()
    }

    fn group(&self) -> i64 {
        self.current().group()
    }

    fn set_ownership(&self, owner: i64, group: i64) {
        self.current().set_ownership(owner, group);
    }

    fn mode(&self) -> Mode {
        self.current().mode()
    }

    fn set_mode(&self, mode: Mode) -> Result<()> {
        self.current().set_mode(mode)
    }

    fn id(&self) -> FileId {
        self.current().id()
    }

    fn nlink(&self) -> u64 {
        self.current().nlink()
    }

    fn link_added(&self) {
        self.current().link_added();
    }

    fn link_removed(&self) {
        self.current().link_removed();
    }

    fn space(&self) -> Result<SpaceInfo> {
        self.current().space()
    }
}

impl Dir for SubShell {
    fn len(&self) -> Result<u64> {
        self.current().len()
    }

    fn is_empty(&self) -> Result<bool> {
        self.current().is_empty()
    }

    fn contains(&self, name: &str) -> Result<bool> {
        self.current().contains(name)
    }

    fn next(&self, name: &str) -> Result<Option<File>> {
        self.current().next(name)
    }

    fn emplace_regular(&self, name: &str) -> Result<Emplaced<Rc<dyn Regular>>> {
        let rst = self.current().emplace_regular(name)?;
        if matches!(rst, Emplaced::Created(_)) {
            self.upgrade();
        }
        Ok(rst)
    }

    fn emplace_dir(&self, name: &str) -> Result<Emplaced<Rc<dyn Dir>>> {
        let rst = self.current().emplace_dir(name)?;
        if matches!(rst, Emplaced::Created(_)) {
            self.upgrade();
        }
        Ok(rst)
    }

    fn emplace_symlink(&self, name: &str, target: &Path) -> Result<Emplaced<Rc<Symlink>>> {
        let rst = self.current().emplace_symlink(name, target)?;
        if matches!(rst, Emplaced::Created(_)) {
            self.upgrade();
        }
        Ok(rst)
    }

    fn link(&self, name: &str, file: File) -> Result<bool> {
        let ok = self.current().link(name, file)?;
        if ok {
            self.upgrade();
        }
        Ok(ok)
    }

    fn relink(&self, name: &str, file: File) -> Result<()> {
        self.current().relink(name, file)?;
        self.upgrade();
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<bool> {
        self.current().unlink(name)
    }

    fn erase(&self, name: &str) -> Result<u64> {
        self.current().erase(name)
    }

    fn clear(&self) -> Result<u64> {
        self.current().clear()
    }

    fn entries(&self) -> Result<Vec<(String, File)>> {
        self.current().entries()
    }

    fn mount_next(&self, name: &str, file: File) -> Result<()> {
        self.current().mount_next(name, file)?;
        self.upgrade();
        Ok(())
    }

    fn unmount_next(&self, name: &str) -> Result<()> {
        self.current().unmount_next(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{MemDir, OpenMode};
    use crate::storage::MemStorage;

    fn mem_dir() -> Rc<MemDir> {
        Rc::new(MemDir::new(Rc::new(MemStorage)))
    }

    fn write_to(d: &Rc<dyn Dir>, name: &str, content: &[u8]) {
        let (f, _) = d.emplace_regular(name).unwrap().get().unwrap();
        f.open_write(OpenMode::empty())
            .unwrap()
            .write_all(content)
            .unwrap();
    }

    fn read_from(d: &dyn Dir, name: &str) -> Vec<u8> {
        let f = d.next(name).unwrap().unwrap().as_regular().unwrap();
        let mut buf = Vec::new();
        f.open_read(OpenMode::BINARY)
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_upper_shadows_lower() {
        let upper = mem_dir();
        let lower = mem_dir();
        write_to(&(upper.clone() as Rc<dyn Dir>), "foo", b"upper");
        write_to(&(lower.clone() as Rc<dyn Dir>), "foo", b"lower");
        write_to(&(lower.clone() as Rc<dyn Dir>), "bar", b"only lower");

        let u = UnionDir::new(upper, lower);
        assert_eq!(b"upper".to_vec(), read_from(&u, "foo"));
        assert_eq!(b"only lower".to_vec(), read_from(&u, "bar"));
        assert_eq!(2, u.len().unwrap());
    }

    #[test]
    fn test_copy_on_write_on_lower_regular() {
        let upper = mem_dir();
        let lower = mem_dir();
        write_to(&(lower.clone() as Rc<dyn Dir>), "foo", b"AAA");

        let u = UnionDir::new(upper.clone(), lower.clone());
        assert_eq!(b"AAA".to_vec(), read_from(&u, "foo"));
        assert!(!upper.contains("foo").unwrap());

        let f = u.next("foo").unwrap().unwrap().as_regular().unwrap();
        f.open_write(OpenMode::empty())
            .unwrap()
            .write_all(b"BBB")
            .unwrap();

        assert!(upper.contains("foo").unwrap());
        assert_eq!(b"BBB".to_vec(), read_from(&u, "foo"));
        assert_eq!(b"AAA".to_vec(), read_from(&*lower, "foo"));
    }

    #[test]
    fn test_append_pre_copies_lower_content() {
        let upper = mem_dir();
        let lower = mem_dir();
        write_to(&(lower.clone() as Rc<dyn Dir>), "log", b"old;");

        let u = UnionDir::new(upper.clone(), lower.clone());
        let f = u.next("log").unwrap().unwrap().as_regular().unwrap();
        f.open_write(OpenMode::APPEND)
            .unwrap()
            .write_all(b"new;")
            .unwrap();

        assert_eq!(b"old;new;".to_vec(), read_from(&u, "log"));
        assert_eq!(b"old;".to_vec(), read_from(&*lower, "log"));
    }

    #[test]
    fn test_unlink_whiteout() {
        let upper = mem_dir();
        let lower = mem_dir();
        write_to(&(lower.clone() as Rc<dyn Dir>), "foo", b"x");

        let u = UnionDir::new(upper, lower.clone());
        assert!(u.unlink("foo").unwrap());
        assert!(!u.contains("foo").unwrap());
        assert!(!u.unlink("foo").unwrap());
        assert!(lower.contains("foo").unwrap());
    }

    #[test]
    fn test_deep_write_materializes_parents() {
        let upper = mem_dir();
        let lower = mem_dir();
        let (a, _) = lower.emplace_dir("a").unwrap().get().unwrap();
        let (b, _) = a.emplace_dir("b").unwrap().get().unwrap();
        write_to(&b, "deep", b"AAA");

        let u = UnionDir::new(upper.clone(), lower);
        let a_view = u.next("a").unwrap().unwrap().as_dir().unwrap();
        let b_view = a_view.next("b").unwrap().unwrap().as_dir().unwrap();
        let f = b_view.next("deep").unwrap().unwrap().as_regular().unwrap();
        f.open_write(OpenMode::empty())
            .unwrap()
            .write_all(b"BBB")
            .unwrap();

        let up_a = upper.next("a").unwrap().unwrap().as_dir().unwrap();
        let up_b = up_a.next("b").unwrap().unwrap().as_dir().unwrap();
        assert_eq!(b"BBB".to_vec(), read_from(&*up_b, "deep"));
    }

    #[test]
    fn test_shell_upgrade_sees_both_sides() {
        let upper = mem_dir();
        let lower = mem_dir();
        let (sub, _) = lower.emplace_dir("sub").unwrap().get().unwrap();
        write_to(&sub, "from_lower", b"x");

        let u = UnionDir::new(upper, lower);
        let view = u.next("sub").unwrap().unwrap().as_dir().unwrap();
        view.emplace_regular("from_upper").unwrap();

        assert!(view.contains("from_lower").unwrap());
        assert!(view.contains("from_upper").unwrap());
        assert_eq!(2, view.entries().unwrap().len());
    }

    #[test]
    fn test_clear_counts_inaccessible() {
        let upper = mem_dir();
        let lower = mem_dir();
        write_to(&(upper.clone() as Rc<dyn Dir>), "shared", b"u");
        write_to(&(lower.clone() as Rc<dyn Dir>), "shared", b"l");
        write_to(&(lower.clone() as Rc<dyn Dir>), "solo", b"l");

        let u = UnionDir::new(upper, lower.clone());
        // "shared" is counted once even though both sides hold it, "solo"
        // once; lower files stay alive underneath.
        assert_eq!(2, u.clear().unwrap());
        assert!(u.is_empty().unwrap());
        assert!(lower.contains("solo").unwrap());
    }

    #[test]
    fn test_emplace_existing_lower_dir() {
        let upper = mem_dir();
        let lower = mem_dir();
        lower.emplace_dir("d").unwrap();

        let u = UnionDir::new(upper, lower);
        let (view, inserted) = u.emplace_dir("d").unwrap().get().unwrap();
        assert!(!inserted);
        assert!(view.is_empty().unwrap());

        assert!(matches!(u.emplace_regular("d").unwrap(), Emplaced::Conflict));
    }
}
