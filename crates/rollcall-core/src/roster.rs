//! Classrooms and their enrolled students.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::{Secret, SecretDigest};
use crate::types::{new_id, Classroom, Photo, Student};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("{0} must not be empty")]
    Validation(&'static str),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("roll id {0:?} is already used in this classroom")]
    DuplicateRollId(String),
    #[error("a student named {0:?} is already enrolled in this classroom")]
    DuplicateName(String),
}

impl RosterError {
    pub(crate) fn classroom_not_found(id: &str) -> Self {
        RosterError::NotFound {
            kind: "classroom",
            id: id.to_string(),
        }
    }

    fn student_not_found(id: &str) -> Self {
        RosterError::NotFound {
            kind: "student",
            id: id.to_string(),
        }
    }
}

/// Input for enrolling a student.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub roll_id: String,
    pub secret: Secret,
    pub photo: Photo,
}

/// Edit of an existing student. The secret is only replaced when a
/// non-blank `new_secret` is supplied.
#[derive(Debug, Clone)]
pub struct UpdateStudentRequest {
    pub name: String,
    pub roll_id: String,
    pub new_secret: Option<Secret>,
}

/// All classrooms, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    classrooms: Vec<Classroom>,
}

impl Roster {
    pub fn new(classrooms: Vec<Classroom>) -> Self {
        Self { classrooms }
    }

    pub fn classrooms(&self) -> &[Classroom] {
        &self.classrooms
    }

    pub fn classroom(&self, classroom_id: &str) -> Option<&Classroom> {
        self.classrooms.iter().find(|c| c.id == classroom_id)
    }

    fn classroom_mut(&mut self, classroom_id: &str) -> Result<&mut Classroom, RosterError> {
        self.classrooms
            .iter_mut()
            .find(|c| c.id == classroom_id)
            .ok_or_else(|| RosterError::classroom_not_found(classroom_id))
    }

    /// Find a student in any classroom, returning it with its classroom.
    pub fn find_student(&self, student_id: &str) -> Option<(&Classroom, &Student)> {
        self.classrooms
            .iter()
            .find_map(|c| c.student(student_id).map(|s| (c, s)))
    }

    /// Exact, case-sensitive name lookup within one classroom.
    pub fn student_by_name(&self, classroom_id: &str, name: &str) -> Option<&Student> {
        self.classroom(classroom_id)?
            .students
            .iter()
            .find(|s| s.name == name)
    }

    pub fn create_classroom(&mut self, name: &str) -> Result<&Classroom, RosterError> {
        let name = required("classroom name", name)?;
        let classroom = Classroom {
            id: new_id(),
            name,
            students: Vec::new(),
        };
        tracing::info!(id = %classroom.id, name = %classroom.name, "classroom created");
        self.classrooms.push(classroom);
        Ok(&self.classrooms[self.classrooms.len() - 1])
    }

    pub fn rename_classroom(&mut self, classroom_id: &str, name: &str) -> Result<(), RosterError> {
        let name = required("classroom name", name)?;
        let classroom = self.classroom_mut(classroom_id)?;
        tracing::info!(id = classroom_id, from = %classroom.name, to = %name, "classroom renamed");
        classroom.name = name;
        Ok(())
    }

    /// Remove a classroom together with its students.
    ///
    /// Reports are not touched here; see [`crate::Tracker::delete_classroom`].
    pub fn delete_classroom(&mut self, classroom_id: &str) -> Result<Classroom, RosterError> {
        let idx = self
            .classrooms
            .iter()
            .position(|c| c.id == classroom_id)
            .ok_or_else(|| RosterError::classroom_not_found(classroom_id))?;
        let removed = self.classrooms.remove(idx);
        tracing::info!(id = classroom_id, students = removed.students.len(), "classroom deleted");
        Ok(removed)
    }

    pub fn add_student(
        &mut self,
        classroom_id: &str,
        new: NewStudent,
    ) -> Result<&Student, RosterError> {
        let name = required("student name", &new.name)?;
        let roll_id = required("roll id", &new.roll_id)?;
        if new.secret.is_blank() {
            return Err(RosterError::Validation("secret"));
        }

        let classroom = self.classroom_mut(classroom_id)?;
        check_unique(classroom, None, &name, &roll_id)?;

        let id = new_id();
        classroom.students.push(Student {
            id: id.clone(),
            name,
            roll_id,
            secret: SecretDigest::new(&new.secret),
            photo: new.photo,
        });
        sort_by_name(&mut classroom.students);
        tracing::info!(classroom = classroom_id, student = %id, "student enrolled");

        let classroom = &*classroom;
        classroom
            .student(&id)
            .ok_or_else(|| RosterError::student_not_found(&id))
    }

    pub fn update_student(
        &mut self,
        student_id: &str,
        update: UpdateStudentRequest,
    ) -> Result<&Student, RosterError> {
        let name = required("student name", &update.name)?;
        let roll_id = required("roll id", &update.roll_id)?;

        let classroom = self
            .classrooms
            .iter_mut()
            .find(|c| c.student(student_id).is_some())
            .ok_or_else(|| RosterError::student_not_found(student_id))?;
        check_unique(classroom, Some(student_id), &name, &roll_id)?;

        let student = classroom
            .students
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or_else(|| RosterError::student_not_found(student_id))?;
        student.name = name;
        student.roll_id = roll_id;
        let secret_changed = match update.new_secret {
            Some(secret) if !secret.is_blank() => {
                student.secret = SecretDigest::new(&secret);
                true
            }
            _ => false,
        };
        sort_by_name(&mut classroom.students);
        tracing::info!(student = student_id, secret_changed, "student updated");

        let classroom = &*classroom;
        classroom
            .student(student_id)
            .ok_or_else(|| RosterError::student_not_found(student_id))
    }

    /// Remove a student from the roster. Past reports keep their copies.
    pub fn remove_student(&mut self, student_id: &str) -> Result<Student, RosterError> {
        for classroom in &mut self.classrooms {
            if let Some(idx) = classroom.students.iter().position(|s| s.id == student_id) {
                let removed = classroom.students.remove(idx);
                tracing::info!(classroom = %classroom.id, student = student_id, "student removed");
                return Ok(removed);
            }
        }
        Err(RosterError::student_not_found(student_id))
    }

    /// Check a student's login. Returns `None` on any mismatch.
    pub fn authenticate_student(
        &self,
        classroom_id: &str,
        roll_id: &str,
        secret: &Secret,
    ) -> Option<&Student> {
        let roll_id = roll_id.trim();
        self.classroom(classroom_id)?
            .students
            .iter()
            .find(|s| s.roll_id == roll_id)
            .filter(|s| s.secret.verify(secret))
    }
}

fn required(field: &'static str, value: &str) -> Result<String, RosterError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RosterError::Validation(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Roll ids and display names are both unique per classroom; names are the
/// join key against recognition output.
fn check_unique(
    classroom: &Classroom,
    except: Option<&str>,
    name: &str,
    roll_id: &str,
) -> Result<(), RosterError> {
    let others = classroom
        .students
        .iter()
        .filter(|s| Some(s.id.as_str()) != except);
    for other in others {
        if other.roll_id == roll_id {
            return Err(RosterError::DuplicateRollId(roll_id.to_string()));
        }
        if other.name == name {
            return Err(RosterError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}

fn sort_by_name(students: &mut [Student]) {
    students.sort_by(|a, b| a.name.cmp(&b.name));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_student(name: &str, roll: &str) -> NewStudent {
        NewStudent {
            name: name.into(),
            roll_id: roll.into(),
            secret: Secret::new("pw"),
            photo: Photo::new("image/png", vec![1, 2, 3]),
        }
    }

    fn roster_with_class() -> (Roster, String) {
        let mut roster = Roster::default();
        let id = roster.create_classroom("Physics").unwrap().id.clone();
        (roster, id)
    }

    #[test]
    fn test_create_classroom_rejects_blank_name() {
        let mut roster = Roster::default();
        assert_eq!(
            roster.create_classroom("   ").unwrap_err(),
            RosterError::Validation("classroom name")
        );
        assert!(roster.classrooms().is_empty());
    }

    #[test]
    fn test_rename_classroom() {
        let (mut roster, id) = roster_with_class();
        roster.rename_classroom(&id, "  Chemistry ").unwrap();
        assert_eq!(roster.classroom(&id).unwrap().name, "Chemistry");
        assert_eq!(
            roster.rename_classroom(&id, "").unwrap_err(),
            RosterError::Validation("classroom name")
        );
        assert!(matches!(
            roster.rename_classroom("nope", "X"),
            Err(RosterError::NotFound { kind: "classroom", .. })
        ));
    }

    #[test]
    fn test_add_student_keeps_roster_sorted() {
        let (mut roster, id) = roster_with_class();
        roster.add_student(&id, new_student("Cleo", "3")).unwrap();
        roster.add_student(&id, new_student("Ann", "1")).unwrap();
        roster.add_student(&id, new_student("Bob", "2")).unwrap();
        let names: Vec<_> = roster
            .classroom(&id)
            .unwrap()
            .students
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, ["Ann", "Bob", "Cleo"]);
    }

    #[test]
    fn test_add_student_validation() {
        let (mut roster, id) = roster_with_class();
        assert_eq!(
            roster.add_student(&id, new_student("", "1")).unwrap_err(),
            RosterError::Validation("student name")
        );
        let mut blank_secret = new_student("Ann", "1");
        blank_secret.secret = Secret::new(" ");
        assert_eq!(
            roster.add_student(&id, blank_secret).unwrap_err(),
            RosterError::Validation("secret")
        );
        assert!(roster.classroom(&id).unwrap().students.is_empty());
    }

    #[test]
    fn test_add_student_rejects_duplicates() {
        let (mut roster, id) = roster_with_class();
        roster.add_student(&id, new_student("Ann", "1")).unwrap();
        assert_eq!(
            roster.add_student(&id, new_student("Bob", "1")).unwrap_err(),
            RosterError::DuplicateRollId("1".into())
        );
        assert_eq!(
            roster.add_student(&id, new_student("Ann", "2")).unwrap_err(),
            RosterError::DuplicateName("Ann".into())
        );
        // Case-sensitive: "ann" is a different name.
        roster.add_student(&id, new_student("ann", "3")).unwrap();
    }

    #[test]
    fn test_same_roll_allowed_in_other_classroom() {
        let (mut roster, a) = roster_with_class();
        let b = roster.create_classroom("Biology").unwrap().id.clone();
        roster.add_student(&a, new_student("Ann", "1")).unwrap();
        roster.add_student(&b, new_student("Ann", "1")).unwrap();
    }

    #[test]
    fn test_update_student_keeps_secret_unless_given() {
        let (mut roster, id) = roster_with_class();
        let sid = roster.add_student(&id, new_student("Ann", "1")).unwrap().id.clone();
        let before = roster.find_student(&sid).unwrap().1.secret.clone();

        roster
            .update_student(
                &sid,
                UpdateStudentRequest {
                    name: "Anna".into(),
                    roll_id: "1".into(),
                    new_secret: Some(Secret::new("")),
                },
            )
            .unwrap();
        let student = roster.find_student(&sid).unwrap().1;
        assert_eq!(student.name, "Anna");
        assert_eq!(student.secret, before);

        roster
            .update_student(
                &sid,
                UpdateStudentRequest {
                    name: "Anna".into(),
                    roll_id: "1".into(),
                    new_secret: Some(Secret::new("new")),
                },
            )
            .unwrap();
        assert!(roster
            .authenticate_student(&id, "1", &Secret::new("new"))
            .is_some());
    }

    #[test]
    fn test_update_student_resorts_and_checks_duplicates() {
        let (mut roster, id) = roster_with_class();
        let ann = roster.add_student(&id, new_student("Ann", "1")).unwrap().id.clone();
        roster.add_student(&id, new_student("Bob", "2")).unwrap();

        let dup = roster.update_student(
            &ann,
            UpdateStudentRequest {
                name: "Bob".into(),
                roll_id: "1".into(),
                new_secret: None,
            },
        );
        assert_eq!(dup.unwrap_err(), RosterError::DuplicateName("Bob".into()));

        roster
            .update_student(
                &ann,
                UpdateStudentRequest {
                    name: "Zed".into(),
                    roll_id: "1".into(),
                    new_secret: None,
                },
            )
            .unwrap();
        let names: Vec<_> = roster
            .classroom(&id)
            .unwrap()
            .students
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, ["Bob", "Zed"]);
    }

    #[test]
    fn test_remove_student() {
        let (mut roster, id) = roster_with_class();
        let sid = roster.add_student(&id, new_student("Ann", "1")).unwrap().id.clone();
        let removed = roster.remove_student(&sid).unwrap();
        assert_eq!(removed.name, "Ann");
        assert!(roster.find_student(&sid).is_none());
        assert!(roster.remove_student(&sid).is_err());
    }

    #[test]
    fn test_authenticate_student() {
        let (mut roster, id) = roster_with_class();
        roster.add_student(&id, new_student("Ann", "1")).unwrap();
        assert!(roster.authenticate_student(&id, "1", &Secret::new("pw")).is_some());
        assert!(roster.authenticate_student(&id, "1", &Secret::new("no")).is_none());
        assert!(roster.authenticate_student(&id, "2", &Secret::new("pw")).is_none());
        assert!(roster.authenticate_student("other", "1", &Secret::new("pw")).is_none());
    }

    #[test]
    fn test_persisted_roster_has_no_plaintext_secret() {
        let (mut roster, id) = roster_with_class();
        let mut s = new_student("Ann", "1");
        s.secret = Secret::new("very-secret-value");
        roster.add_student(&id, s).unwrap();
        let json = serde_json::to_string(&roster).unwrap();
        assert!(!json.contains("very-secret-value"));
        assert!(json.starts_with('['));
    }
}
